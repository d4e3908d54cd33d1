//! The GPU core: guest process/VM slot tracking, PM4 ring decoding, the
//! GFX/compute pipe fleet, the per-VM resource cache, the tiler-backed
//! present (flip) path, and the device that ties all of it together.
//!
//! Mirrors `wgpu-core`'s role atop `wgpu-types`/`naga`/`wgpu-hal` in this
//! workspace: `gpu-types` names the shared value types, `shader-ir` owns
//! the IR/translator, `gpu-hal` wraps the Vulkan-facing primitives
//! (scheduler, tiler, device), and this crate orchestrates all of them
//! into the guest-facing command-stream engine spec.md describes.

#![allow(
    // We use loops for getting early-out of scope without closures.
    clippy::never_loop,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Need many arguments for some core functions to be able to re-use code in many situations.
    clippy::too_many_arguments,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
)]

pub mod cache;
pub mod device;
pub mod error;
pub mod flip;
mod interval_map;
pub mod pipe;
pub mod pm4;
pub mod process;
pub mod register_file;
