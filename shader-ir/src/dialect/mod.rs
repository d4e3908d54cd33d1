//! Opcode namespaces contributing variants to `ir::instruction::Op`.
//!
//! Each dialect is just an enum plus a couple of classification methods;
//! none of them know how to construct or walk instructions themselves —
//! that's `ir::Context`'s job. Splitting them into modules keeps the huge
//! GCN/SPIR-V opcode rosters from turning `ir::instruction` into one wall
//! of variants.

pub mod builtin;
pub mod memssa;
pub mod sop2;
pub mod spirv;
