//! Shared value and format types used across the guest GPU emulation engine.
//!
//! This crate sits at the bottom of the dependency graph (mirroring
//! `wgpu-types`'s role under `naga`/`wgpu-hal`/`wgpu-core`): it owns the
//! small, copyable types that every other crate needs to name in its public
//! signatures, but that have no business depending on the IR, the HAL, or
//! the orchestration layer.

#![warn(trivial_casts, trivial_numeric_casts, unused_extern_crates)]

mod access;
mod format;
mod vector;

pub use access::{Access, MemoryProtection};
pub use format::{
    ArrayMode, DataFormat, IndexType, MacroTileMode, MicroTileMode, NumericFormat, PrimitiveType,
    TileMode,
};
pub use vector::{
    BVec2, BVec3, BVec4, F32Vec2, F32Vec3, F32Vec4, F64Vec2, F64Vec3, F64Vec4, I32Vec2, I32Vec3,
    I32Vec4, I64Vec2, I64Vec3, I64Vec4, U32Vec2, U32Vec3, U32Vec4, U64Vec2, U64Vec3, U64Vec4,
    Vector,
};

/// Indirect-buffer nesting levels a graphics pipe's per-opcode handler
/// table is indexed by (`IB level 0` = the primary ring, up to two levels
/// of `INDIRECT_BUFFER`/`INDIRECT_BUFFER_CONST` nesting beyond it).
pub const GFX_INDIRECT_LEVELS: usize = 4;

/// `GraphicsPipe::deQueues` count: three draw-engine ring slots plus the
/// separate constant-engine ring (tracked independently, not part of this
/// count).
pub const GFX_DE_QUEUE_COUNT: usize = 3;

/// The maximum number of guest process (VM) slots the device supports.
///
/// Mirrors `kMaxProcessCount` from the original device table; kept as a
/// workspace-wide constant rather than a runtime-configured value since
/// nothing downstream can meaningfully resize it after `Device::new`.
pub const MAX_PROCESS_COUNT: usize = 6;

/// Number of fixed-function GFX (graphics) pipes exposed by the device.
pub const GFX_PIPE_COUNT: usize = 2;

/// Number of compute pipes exposed by the device, each multiplexing
/// [`COMPUTE_QUEUE_COUNT`] queues of [`COMPUTE_RINGS_PER_QUEUE`] rings.
///
/// Matches `Device::kComputePipeCount` in the original; an earlier pass
/// of this crate under-counted this as `1`, conflating "one compute
/// pipe type" with "one compute pipe instance".
pub const COMPUTE_PIPE_COUNT: usize = 8;

/// Queues multiplexed onto a single compute pipe. Matches
/// `ComputePipe::kQueueCount`.
pub const COMPUTE_QUEUE_COUNT: usize = 8;

/// Indirect-buffer nesting rings per compute queue. Matches
/// `ComputePipe::kRingsPerQueue`.
pub const COMPUTE_RINGS_PER_QUEUE: usize = 2;

/// Dword offsets of the register banks from the start of a pipe's register
/// file, `§6 Register offsets`.
pub mod register_offsets {
    pub const CONFIG: u32 = 0x2000;
    pub const SHADER_CONFIG: u32 = 0x2c00;
    pub const COMPUTE_CONFIG: u32 = 0x2e00;
    pub const CONTEXT: u32 = 0xa000;
    pub const UCONFIG: u32 = 0xc000;
    pub const COUNTERS: u32 = 0xd000;
}
