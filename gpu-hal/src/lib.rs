//! Vulkan-flavored hardware abstraction: per-queue scheduler, tile/detile
//! compute dispatch, and a minimal buffer/image/sampler device layer.
//!
//! Mirrors `wgpu-hal`'s role under `wgpu-core` in the original stack, but
//! scoped to the single Vulkan backend and the operations this engine's
//! pipes and resource cache actually need — there is no cross-platform
//! `Api` trait here, and no swapchain/surface management (the embedder
//! owns presentation; see [`device::Device::present`]).

#![warn(trivial_casts, trivial_numeric_casts, unused_extern_crates)]

pub mod device;
pub mod scheduler;
pub mod tiler;

pub use device::{
    Buffer, BufferDescriptor, Device, DeviceError, Image, ImageDescriptor, Sampler,
    SamplerDescriptor,
};
pub use scheduler::Scheduler;
pub use tiler::{
    Config as TilerConfig, Direction as TilerDirection, Dispatch as TilerDispatch, GpuTiler,
    ShaderFamily, SlotPool, SubresourceInfo, SurfaceInfo, TilerError, TILER_SLOT_COUNT,
};
