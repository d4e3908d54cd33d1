//! SSA-form intermediate representation and GCN-to-SPIR-V shader
//! translator.
//!
//! Mirrors `naga`'s role in the original stack: every other crate that
//! needs to reason about shader code (the resource cache compiling a
//! shader on a cache miss, the pipe decoding a guest command stream)
//! depends on this crate rather than building its own IR. Layout:
//!
//! - [`ir`] — the arena-owned instruction graph (`Context`, `InstId`,
//!   `Block`, `Construct`) plus operand storage, name bookkeeping, and
//!   location tracking.
//! - [`dialect`] — the opcode namespaces (`builtin`, `spirv`, `memssa`,
//!   `sop2`) that contribute variants to [`ir::Op`].
//! - [`analysis`] — CFG construction, dominator/post-dominator trees,
//!   back-edge detection, memory-SSA, and the analysis cache.
//! - [`eval`] — constant folding over [`ir::Operand`] values.
//! - [`translate`] — GCN decode, the instruction combiner, and
//!   `ModuleInfo` resource-access collection.

#![warn(trivial_casts, trivial_numeric_casts, unused_extern_crates)]

pub mod analysis;
pub mod dialect;
pub mod eval;
pub mod ir;
pub mod translate;

pub use ir::{
    Block, BlockId, BlockIter, CloneMap, Construct, ConstructId, Context, InstId, Instruction,
    Location, LocationId, NameStorage, Op, Operand, OperandList, ValueUse,
};
