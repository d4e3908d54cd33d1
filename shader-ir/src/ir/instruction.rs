use crate::dialect::{builtin, memssa, sop2, spirv};

/// The dialect-qualified opcode carried by an instruction.
///
/// The original code splits opcodes across several translation units
/// (`dialect/builtin.hpp`, `dialect/spirv.hpp`, `dialect/memssa.hpp`,
/// `dialect/sop2.hpp`) each contributing to one big tagged union of
/// instruction kinds. Since every instruction still lives in one arena
/// here, the dialects just become variants of one enum instead of a
/// runtime type-id check against a dialect table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Builtin(builtin::Op),
    Spirv(spirv::Op),
    MemSsa(memssa::Op),
    Sop2(sop2::Op),
}

impl Op {
    /// Whether this opcode produces a usable value (and therefore the
    /// instruction carrying it may appear as another instruction's
    /// operand).
    pub fn has_result(&self) -> bool {
        match self {
            Op::Builtin(op) => op.has_result(),
            Op::Spirv(op) => op.has_result(),
            Op::MemSsa(op) => op.has_result(),
            Op::Sop2(op) => op.has_result(),
        }
    }

    /// Whether this instruction has no observable effect beyond producing
    /// its result, i.e. it is safe for the instruction combiner and dead
    /// code elimination to remove if unused. Mirrors `isWithoutSideEffects`.
    pub fn is_without_side_effects(&self) -> bool {
        match self {
            Op::Builtin(op) => op.is_without_side_effects(),
            Op::Spirv(op) => op.is_without_side_effects(),
            Op::MemSsa(op) => op.is_without_side_effects(),
            Op::Sop2(op) => op.is_without_side_effects(),
        }
    }

    /// Whether this opcode is a block terminator (branch/return/unreachable),
    /// used by CFG construction to find block boundaries.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Op::Builtin(
                builtin::Op::Branch | builtin::Op::BranchConditional | builtin::Op::Return
            ) | Op::MemSsa(memssa::Op::Jump | memssa::Op::Exit)
        )
    }
}
