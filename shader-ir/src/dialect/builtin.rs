//! Generic arithmetic and control-flow opcodes, dialect-agnostic enough to
//! appear before a module has been lowered to a concrete target dialect.
//! Grounded on the original's `dialect/builtin.hpp` namespace of ops that
//! every other dialect builds on top of (constants, arithmetic, phi,
//! branches).

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    // Constants / values
    ConstantInt,
    ConstantFloat,
    ConstantBool,
    ConstantComposite,
    Undef,

    // Arithmetic
    IAdd,
    ISub,
    IMul,
    IDiv,
    UDiv,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FNeg,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    LogicalAnd,
    LogicalOr,
    LogicalNot,

    // Comparisons
    IEqual,
    INotEqual,
    SLessThan,
    ULessThan,
    FOrdLessThan,
    FOrdEqual,

    // Conversions
    IConvert,
    FConvert,
    Bitcast,
    Select,

    // Vector / composite
    CompositeConstruct,
    CompositeExtract,
    CompositeInsert,

    // Control flow
    Label,
    Phi,
    Branch,
    BranchConditional,
    Return,
    FunctionCall,
}

impl Op {
    pub fn has_result(&self) -> bool {
        !matches!(
            self,
            Op::Branch | Op::BranchConditional | Op::Return | Op::Label
        )
    }

    pub fn is_without_side_effects(&self) -> bool {
        !matches!(
            self,
            Op::Branch | Op::BranchConditional | Op::Return | Op::FunctionCall | Op::Label
        )
    }
}
