//! Lowers GCN scalar-ALU (`SOP2`) encoded words into IR instructions.
//!
//! The full GCN instruction set decoder (vector ALU, memory, export,
//! flow-control formats) is a large per-format bitfield table; this module
//! covers the `SOP2` format end to end (the concrete dialect this crate
//! already carries, `dialect::sop2`) as the translator's worked slice, and
//! is the extension point new formats get added to.
//!
//! `SOP2` word layout (`original_source/.../dialect/sop2.hpp`'s encoding
//! comment): bits `[31:30] = 10` (scalar format tag), `[29:23] = op`,
//! `[22:16] = sdst`, `[15:8] = ssrc1`, `[7:0] = ssrc0`.

use smallvec::smallvec;

use crate::dialect::sop2;
use crate::ir::{Context, InstId, Location, LocationId, Op, Operand};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeError {
    pub address: u64,
    pub raw: u32,
}

/// One decoded `SOP2` instruction: the opcode plus its three raw 8-bit
/// operand fields. Register-file resolution (mapping `ssrc0`/`ssrc1`/`sdst`
/// fields to SGPR/constant operands) is a later lowering stage; this
/// function only peels the opcode out of the word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sop2Instruction {
    pub op: sop2::Op,
    pub sdst: u8,
    pub ssrc0: u8,
    pub ssrc1: u8,
}

pub fn decode_sop2(raw: u32) -> Option<Sop2Instruction> {
    let tag = (raw >> 30) & 0b11;
    if tag != 0b10 {
        return None;
    }
    let op = sop2::decode(((raw >> 23) & 0x7f) as u8)?;
    Some(Sop2Instruction {
        op,
        sdst: ((raw >> 16) & 0x7f) as u8,
        ssrc0: (raw & 0xff) as u8,
        ssrc1: ((raw >> 8) & 0xff) as u8,
    })
}

/// Emits one `SOP2` instruction into `ctx` at `block`, operand registers
/// resolved through `resolve_register` (a caller-supplied SGPR-to-`InstId`
/// lookup, since register file state lives outside the IR proper). Returns
/// the new instruction's id so the caller can bind it as `sdst`'s current
/// value.
pub fn emit_sop2(
    ctx: &mut Context,
    block: crate::ir::BlockId,
    loc: LocationId,
    decoded: Sop2Instruction,
    resolve_register: impl Fn(u8) -> InstId,
) -> InstId {
    let src0 = resolve_register(decoded.ssrc0);
    let src1 = resolve_register(decoded.ssrc1);
    let inst = ctx.create_instruction(
        loc,
        Op::Sop2(decoded.op),
        smallvec![Operand::Value(src0), Operand::Value(src1)],
    );
    ctx.add_child(block, inst);
    inst
}

/// Decodes and emits a contiguous run of `SOP2` words starting at
/// `guest_address`, failing closed on the first unrecognized opcode since
/// guest shader binaries are untrusted input — grounded on the spec's
/// "reserved opcode ranges are fatal" posture applied to guest code in
/// general, not just PM4 packets.
pub fn translate_sop2_block(
    ctx: &mut Context,
    block: crate::ir::BlockId,
    guest_address: u64,
    words: &[u32],
    resolve_register: impl Fn(u8) -> InstId,
) -> Result<Vec<InstId>, DecodeError> {
    let mut out = Vec::with_capacity(words.len());
    for (i, &raw) in words.iter().enumerate() {
        let address = guest_address + (i as u64) * 4;
        let Some(decoded) = decode_sop2(raw) else {
            return Err(DecodeError { address, raw });
        };
        let loc = ctx.intern_location(Location::Gcn { address });
        out.push(emit_sop2(ctx, block, loc, decoded, &resolve_register));
    }
    Ok(out)
}
