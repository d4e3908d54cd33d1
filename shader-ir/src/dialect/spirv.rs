//! The terminal dialect: opcodes that map near one-to-one onto SPIR-V
//! instructions, used for the final instruction-combined module handed to
//! `translate::spirv_emit`. Grounded on the original's `dialect/spirv.hpp`,
//! which mirrors the subset of the SPIR-V spec this engine actually emits
//! (no validation-only or debug-info opcodes).

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Variable,
    Load,
    Store,
    AccessChain,
    ImageSampleImplicitLod,
    ImageFetch,
    ImageWrite,
    ImageRead,
    VectorShuffle,
    Dot,
    ExtInst,
    FunctionParameter,
    ReturnValue,
    Kill,
}

impl Op {
    pub fn has_result(&self) -> bool {
        !matches!(
            self,
            Op::Store | Op::ImageWrite | Op::ReturnValue | Op::Kill
        )
    }

    pub fn is_without_side_effects(&self) -> bool {
        !matches!(
            self,
            Op::Store | Op::ImageWrite | Op::ReturnValue | Op::Kill | Op::Load
        )
    }
}
