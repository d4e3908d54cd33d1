//! The IR core: an append-only arena of instructions addressed by
//! `Copy` handles, plus the region/construct hierarchy, naming, and
//! cloning machinery every dialect and analysis builds on.

mod clone;
mod context;
mod instruction;
mod location;
mod name_storage;
mod operand;

pub use clone::CloneMap;
pub use context::{Block, BlockId, BlockIter, Construct, ConstructId, Context, InstId, Instruction, ValueUse};
pub use instruction::Op;
pub use location::{Location, LocationId};
pub use name_storage::NameStorage;
pub use operand::{Operand, OperandList};
