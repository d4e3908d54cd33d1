//! Minimal Vulkan device/buffer/image abstraction.
//!
//! Grounded on the shape of `Device`/`Buffer`/`Texture`/`Sampler` in the
//! pack's `wgpu-hal` vulkan backend (`vulkan/mod.rs`'s struct definitions),
//! reduced to the subset this engine's pipe/cache/tiler layers actually
//! drive: buffer and image lifetime plus mapped-pointer access for the
//! resource cache's backing store. Swapchain/surface management is
//! explicitly out of scope (the engine never owns a presentable surface;
//! `Device::present` below is a hook the embedder wires up, not a
//! `VkSwapchainKHR` wrapper).

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use gpu_alloc::{AllocationFlags, Config, DeviceProperties, MemoryDevice, Request};
use gpu_descriptor::{DescriptorAllocator, DescriptorDevice, DescriptorTotalCount};
use parking_lot::Mutex;
use thiserror::Error;

use crate::scheduler::Scheduler;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("device lost")]
    Lost,
}

impl From<vk::Result> for DeviceError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                DeviceError::OutOfMemory
            }
            vk::Result::ERROR_DEVICE_LOST => DeviceError::Lost,
            other => {
                log::warn!("unrecognized device error {other:?}");
                DeviceError::Lost
            }
        }
    }
}

/// Thin newtype so `gpu_alloc`'s and `gpu_descriptor`'s device traits can be
/// implemented against `ash::Device` without orphan-rule friction.
struct RawDevice(ash::Device);

unsafe impl MemoryDevice<vk::DeviceMemory> for RawDevice {
    unsafe fn allocate_memory(
        &self,
        size: u64,
        memory_type: u32,
        flags: AllocationFlags,
    ) -> Result<vk::DeviceMemory, gpu_alloc::OutOfMemory> {
        let mut info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type);

        let mut flags_info;
        if flags.contains(AllocationFlags::DEVICE_ADDRESS) {
            flags_info = vk::MemoryAllocateFlagsInfo::default()
                .flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
            info = info.push_next(&mut flags_info);
        }

        unsafe { self.0.allocate_memory(&info, None) }
            .map_err(|_| gpu_alloc::OutOfMemory::OutOfDeviceMemory)
    }

    unsafe fn deallocate_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.0.free_memory(memory, None) };
    }

    unsafe fn map_memory(
        &self,
        memory: &mut vk::DeviceMemory,
        offset: u64,
        size: u64,
    ) -> Result<NonNull<u8>, gpu_alloc::DeviceMapError> {
        let ptr = unsafe {
            self.0
                .map_memory(*memory, offset, size, vk::MemoryMapFlags::empty())
        }
        .map_err(|_| gpu_alloc::DeviceMapError::OutOfDeviceMemory)?;
        NonNull::new(ptr as *mut u8).ok_or(gpu_alloc::DeviceMapError::OutOfDeviceMemory)
    }

    unsafe fn unmap_memory(&self, memory: &mut vk::DeviceMemory) {
        unsafe { self.0.unmap_memory(*memory) };
    }

    unsafe fn invalidate_memory_ranges(
        &self,
        _ranges: &[gpu_alloc::MappedMemoryRange<'_, vk::DeviceMemory>],
    ) -> Result<(), gpu_alloc::OutOfMemory> {
        Ok(())
    }

    unsafe fn flush_memory_ranges(
        &self,
        _ranges: &[gpu_alloc::MappedMemoryRange<'_, vk::DeviceMemory>],
    ) -> Result<(), gpu_alloc::OutOfMemory> {
        Ok(())
    }
}

unsafe impl DescriptorDevice<vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet>
    for RawDevice
{
    unsafe fn create_descriptor_pool(
        &self,
        descriptor_count: &DescriptorTotalCount,
        max_sets: u32,
        flags: gpu_descriptor::DescriptorPoolCreateFlags,
    ) -> Result<vk::DescriptorPool, gpu_descriptor::CreatePoolError> {
        let mut sizes = Vec::new();
        let mut push = |ty: vk::DescriptorType, count: u32| {
            if count > 0 {
                sizes.push(vk::DescriptorPoolSize {
                    ty,
                    descriptor_count: count,
                });
            }
        };
        push(vk::DescriptorType::SAMPLER, descriptor_count.sampler);
        push(
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count.combined_image_sampler,
        );
        push(vk::DescriptorType::SAMPLED_IMAGE, descriptor_count.sampled_image);
        push(vk::DescriptorType::STORAGE_IMAGE, descriptor_count.storage_image);
        push(
            vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
            descriptor_count.uniform_texel_buffer,
        );
        push(
            vk::DescriptorType::STORAGE_TEXEL_BUFFER,
            descriptor_count.storage_texel_buffer,
        );
        push(vk::DescriptorType::UNIFORM_BUFFER, descriptor_count.uniform_buffer);
        push(vk::DescriptorType::STORAGE_BUFFER, descriptor_count.storage_buffer);
        push(
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            descriptor_count.uniform_buffer_dynamic,
        );
        push(
            vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            descriptor_count.storage_buffer_dynamic,
        );
        push(
            vk::DescriptorType::INPUT_ATTACHMENT,
            descriptor_count.input_attachment,
        );

        let mut pool_flags = vk::DescriptorPoolCreateFlags::empty();
        if flags.contains(gpu_descriptor::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND) {
            pool_flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }

        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&sizes)
            .flags(pool_flags);

        unsafe { self.0.create_descriptor_pool(&info, None) }
            .map_err(|_| gpu_descriptor::CreatePoolError::OutOfDeviceMemory)
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.0.destroy_descriptor_pool(pool, None) };
    }

    unsafe fn alloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        layouts: impl ExactSizeIterator<Item = &'a vk::DescriptorSetLayout>,
        sets: &mut impl Extend<vk::DescriptorSet>,
    ) -> Result<(), gpu_descriptor::DeviceAllocationError> {
        let layouts: Vec<_> = layouts.copied().collect();
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(*pool)
            .set_layouts(&layouts);
        let allocated = unsafe { self.0.allocate_descriptor_sets(&info) }
            .map_err(|_| gpu_descriptor::DeviceAllocationError::OutOfDeviceMemory)?;
        sets.extend(allocated);
        Ok(())
    }

    unsafe fn dealloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        sets: impl Iterator<Item = vk::DescriptorSet>,
    ) {
        let sets: Vec<_> = sets.collect();
        let _ = unsafe { self.0.free_descriptor_sets(*pool, &sets) };
    }
}

/// A reference-counted device handle plus the sub-allocators every resource
/// creation path shares. Mirrors `vulkan::Device`'s role, minus everything
/// downstream of swapchain/render-pass/framebuffer caching.
pub struct Device {
    raw: RawDevice,
    physical_device: vk::PhysicalDevice,
    memory_allocator: Mutex<gpu_alloc::GpuAllocator<vk::DeviceMemory>>,
    descriptor_allocator:
        Mutex<DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>>,
    scheduler: Arc<Scheduler>,
}

impl Device {
    pub fn new(
        raw: ash::Device,
        physical_device: vk::PhysicalDevice,
        properties: DeviceProperties<'static>,
        queue_family: u32,
    ) -> Self {
        let config = Config::i_am_prototyping();
        Device {
            raw: RawDevice(raw),
            physical_device,
            memory_allocator: Mutex::new(gpu_alloc::GpuAllocator::new(config, properties)),
            descriptor_allocator: Mutex::new(DescriptorAllocator::new(0)),
            scheduler: Arc::new(Scheduler::new(queue_family)),
        }
    }

    pub fn raw(&self) -> &ash::Device {
        &self.raw.0
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Buffer, DeviceError> {
        let info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let raw = unsafe { self.raw.0.create_buffer(&info, None) }?;
        let requirements = unsafe { self.raw.0.get_buffer_memory_requirements(raw) };

        let request = Request {
            size: requirements.size,
            align_mask: requirements.alignment - 1,
            memory_types: requirements.memory_type_bits,
            usage: desc.memory_usage,
        };
        let block = unsafe { self.memory_allocator.lock().alloc(&self.raw, request) }
            .map_err(|_| DeviceError::OutOfMemory)?;

        unsafe {
            self.raw
                .0
                .bind_buffer_memory(raw, *block.memory(), block.offset())?
        };

        Ok(Buffer { raw, block: Some(block) })
    }

    pub fn destroy_buffer(&self, buffer: Buffer) {
        unsafe { self.raw.0.destroy_buffer(buffer.raw, None) };
        if let Some(block) = buffer.block {
            unsafe { self.memory_allocator.lock().dealloc(&self.raw, block) };
        }
    }

    pub fn create_image(&self, desc: &ImageDescriptor) -> Result<Image, DeviceError> {
        let info = vk::ImageCreateInfo::default()
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let raw = unsafe { self.raw.0.create_image(&info, None) }?;
        let requirements = unsafe { self.raw.0.get_image_memory_requirements(raw) };

        let request = Request {
            size: requirements.size,
            align_mask: requirements.alignment - 1,
            memory_types: requirements.memory_type_bits,
            usage: gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS,
        };
        let block = unsafe { self.memory_allocator.lock().alloc(&self.raw, request) }
            .map_err(|_| DeviceError::OutOfMemory)?;

        unsafe {
            self.raw
                .0
                .bind_image_memory(raw, *block.memory(), block.offset())?
        };

        Ok(Image { raw, block, format: desc.format })
    }

    pub fn destroy_image(&self, image: Image) {
        unsafe { self.raw.0.destroy_image(image.raw, None) };
        unsafe { self.memory_allocator.lock().dealloc(&self.raw, image.block) };
    }

    pub fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<Sampler, DeviceError> {
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode);
        let raw = unsafe { self.raw.0.create_sampler(&info, None) }?;
        Ok(Sampler { raw })
    }

    pub fn destroy_sampler(&self, sampler: Sampler) {
        unsafe { self.raw.0.destroy_sampler(sampler.raw, None) };
    }

    /// Maps the full extent of `buffer`'s backing memory block for CPU
    /// access. Returns `None` for buffers without a host-visible memory
    /// type (e.g. device-local scratch buffers the tiler never reads back).
    ///
    /// # Safety
    /// The caller must not read or write past the buffer's allocated size,
    /// and must not call this while the GPU has in-flight writes this map
    /// hasn't synchronized with.
    pub unsafe fn map_buffer(&self, buffer: &mut Buffer) -> Option<NonNull<u8>> {
        let block = buffer.block.as_mut()?;
        unsafe { block.map(&self.raw, 0, block.size() as usize) }.ok()
    }

    /// # Safety
    /// `buffer` must currently be mapped via `map_buffer`.
    pub unsafe fn unmap_buffer(&self, buffer: &mut Buffer) {
        if let Some(block) = buffer.block.as_mut() {
            unsafe { block.unmap(&self.raw) }.ok();
        }
    }

    /// Present hook. Deliberately not a `VkSwapchainKHR` wrapper: this
    /// engine's output is handed to whatever embedder owns the actual
    /// window surface, matching the distilled spec's non-goal on
    /// presentation infrastructure.
    pub fn present(&self, hook: impl FnOnce(&ash::Device, &Arc<Scheduler>)) {
        hook(&self.raw.0, &self.scheduler);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor {
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub memory_usage: gpu_alloc::UsageFlags,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageDescriptor {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerDescriptor {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
}

pub struct Buffer {
    raw: vk::Buffer,
    block: Option<gpu_alloc::MemoryBlock<vk::DeviceMemory>>,
}

impl Buffer {
    pub fn raw_handle(&self) -> vk::Buffer {
        self.raw
    }
}

pub struct Image {
    raw: vk::Image,
    block: gpu_alloc::MemoryBlock<vk::DeviceMemory>,
    format: vk::Format,
}

impl Image {
    pub fn raw_handle(&self) -> vk::Image {
        self.raw
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

pub struct Sampler {
    raw: vk::Sampler,
}

impl Sampler {
    pub fn raw_handle(&self) -> vk::Sampler {
        self.raw
    }
}
