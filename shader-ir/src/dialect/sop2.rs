//! A concrete subset of the GCN scalar-ALU (`SOP2`) opcode space, kept as
//! its own dialect so the translator can pattern-match scalar-unit
//! instructions before they're lowered into `builtin`/`spirv` ops.
//! Grounded on `original_source/.../dialect/sop2.hpp`.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    SAddU32,
    SSubU32,
    SAddI32,
    SSubI32,
    SMinI32,
    SMaxI32,
    SMinU32,
    SMaxU32,
    SCselectB32,
    SAndB32,
    SOrB32,
    SXorB32,
    SAndnB32,
    SOrnB32,
    SNandB32,
    SNorB32,
    SXnorB32,
    SLshlB32,
    SLshrB32,
    SAshrI32,
    SBfmB32,
    SMulI32,
    SBfeU32,
    SBfeI32,
    SAbsdiffI32,
}

impl Op {
    pub fn has_result(&self) -> bool {
        true
    }

    pub fn is_without_side_effects(&self) -> bool {
        true
    }
}

/// `decode` maps a raw 8-bit `SOP2` GCN opcode field onto this dialect.
/// Grounded on the scalar-ALU opcode table the original decoder indexes
/// into; unrecognized opcodes are a translation failure, not a panic,
/// since they come from guest-controlled shader binaries.
pub fn decode(raw: u8) -> Option<Op> {
    Some(match raw {
        0x00 => Op::SAddU32,
        0x01 => Op::SSubU32,
        0x02 => Op::SAddI32,
        0x03 => Op::SSubI32,
        0x04 => Op::SMinI32,
        0x05 => Op::SMaxI32,
        0x06 => Op::SMinU32,
        0x07 => Op::SMaxU32,
        0x08 => Op::SCselectB32,
        0x0e => Op::SAndB32,
        0x0f => Op::SOrB32,
        0x10 => Op::SXorB32,
        0x11 => Op::SAndnB32,
        0x12 => Op::SOrnB32,
        0x13 => Op::SNandB32,
        0x14 => Op::SNorB32,
        0x15 => Op::SXnorB32,
        0x18 => Op::SLshlB32,
        0x1a => Op::SLshrB32,
        0x1c => Op::SAshrI32,
        0x1e => Op::SBfmB32,
        0x26 => Op::SMulI32,
        0x28 => Op::SBfeU32,
        0x29 => Op::SBfeI32,
        0x2a => Op::SAbsdiffI32,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_opcode() {
        assert_eq!(decode(0x00), Some(Op::SAddU32));
    }

    #[test]
    fn rejects_unknown_opcode() {
        assert_eq!(decode(0xff), None);
    }
}
