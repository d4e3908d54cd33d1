//! Present-path flip pipeline: blits a guest-registered presentable
//! buffer to the window surface through one of two fragment shader
//! variants selected by the buffer's colorspace.
//!
//! Grounded on `original_source/rpcsx-gpu2/FlipPipeline.hpp`/`.cpp`:
//! one vertex shader (a full-screen triangle, no vertex buffer) shared by
//! two graphics pipelines (`Std`/`Alt` fragment shaders), one descriptor
//! set layout (binding 0 = sampled image, binding 1 = sampler), and a
//! fixed `kDescriptorSetCount = 16`-slot descriptor pool whose sets are
//! handed out and reclaimed the same way `tiler.rs`'s `SlotPool` hands
//! out tiler descriptor slots — `bind` allocates a slot, writes it, and
//! registers a `Scheduler::after_submit` hook to free it once the frame
//! that referenced it has retired.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use gpu_hal::Scheduler;

/// Number of descriptor sets (and therefore in-flight flips) the
/// pipeline keeps live at once. Matches `FlipPipeline::kDescriptorSetCount`.
pub const DESCRIPTOR_SET_COUNT: u32 = 16;

#[derive(Debug, Error)]
pub enum FlipError {
    #[error("flip descriptor-set pool exhausted ({DESCRIPTOR_SET_COUNT} slots in use)")]
    DescriptorPoolExhausted,
    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),
}

/// Which of the two fragment-shader variants a flip selects, matching
/// `FlipType::Std`/`FlipType::Alt` — `Std` for a linear/sRGB buffer,
/// `Alt` for the colorspace conversion the original's alt fragment
/// shader performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlipType {
    Std,
    Alt,
}

struct SlotPool {
    bitmask: AtomicU16,
}

impl SlotPool {
    fn new() -> Self {
        SlotPool { bitmask: AtomicU16::new(0) }
    }

    fn acquire(&self) -> Option<u32> {
        let mut current = self.bitmask.load(Ordering::Acquire);
        loop {
            let free = (0..DESCRIPTOR_SET_COUNT as u16).find(|&bit| current & (1 << bit) == 0);
            let bit = free?;
            let updated = current | (1 << bit);
            match self.bitmask.compare_exchange_weak(current, updated, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Some(bit as u32),
                Err(observed) => current = observed,
            }
        }
    }

    fn release(&self, index: u32) {
        self.bitmask.fetch_and(!(1u16 << index), Ordering::AcqRel);
    }
}

/// Compiled Vulkan state for the flip pipeline: shared vertex stage,
/// descriptor set layout/pool, one pipeline per [`FlipType`].
///
/// SPIR-V blobs are supplied by the caller at construction time, the
/// same convention `gpu_hal::tiler::GpuTiler::new` uses, since this
/// crate has no shader-compilation step of its own.
pub struct FlipPipeline {
    pipeline_layout: vk::PipelineLayout,
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipelines: [vk::Pipeline; 2],
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: [vk::DescriptorSet; DESCRIPTOR_SET_COUNT as usize],
    slots: SlotPool,
}

impl FlipPipeline {
    /// # Safety
    /// `device` must be a valid, live `ash::Device`, `render_pass` a
    /// compatible render pass the caller owns, and `vert_spirv`/
    /// `frag_std_spirv`/`frag_alt_spirv` valid SPIR-V modules.
    pub unsafe fn new(
        device: &ash::Device,
        render_pass: vk::RenderPass,
        vert_spirv: &[u32],
        frag_std_spirv: &[u32],
        frag_alt_spirv: &[u32],
    ) -> Result<Self, FlipError> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        ];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let descriptor_set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None)? };

        let set_layouts = [descriptor_set_layout];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let pipeline_layout = unsafe { device.create_pipeline_layout(&pipeline_layout_info, None)? };

        let entry_point = std::ffi::CStr::from_bytes_with_nul(b"main\0").unwrap_or_else(|_| unreachable!());
        let vert_module = unsafe { device.create_shader_module(&vk::ShaderModuleCreateInfo::default().code(vert_spirv), None)? };
        let frag_std_module = unsafe { device.create_shader_module(&vk::ShaderModuleCreateInfo::default().code(frag_std_spirv), None)? };
        let frag_alt_module = unsafe { device.create_shader_module(&vk::ShaderModuleCreateInfo::default().code(frag_alt_spirv), None)? };

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        let attachments = [color_blend_attachment];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&attachments);

        let mut pipelines = Vec::with_capacity(2);
        for frag_module in [frag_std_module, frag_alt_module] {
            let stages = [
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::VERTEX)
                    .module(vert_module)
                    .name(entry_point),
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(frag_module)
                    .name(entry_point),
            ];
            let create_info = vk::GraphicsPipelineCreateInfo::default()
                .stages(&stages)
                .vertex_input_state(&vertex_input)
                .input_assembly_state(&input_assembly)
                .viewport_state(&viewport_state)
                .dynamic_state(&dynamic_state)
                .rasterization_state(&rasterization)
                .multisample_state(&multisample)
                .color_blend_state(&color_blend)
                .layout(pipeline_layout)
                .render_pass(render_pass)
                .subpass(0);
            let pipeline = unsafe {
                device
                    .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                    .map_err(|(_, err)| err)?[0]
            };
            pipelines.push(pipeline);
        }
        for module in [vert_module, frag_std_module, frag_alt_module] {
            unsafe { device.destroy_shader_module(module, None) };
        }

        let pool_sizes = [
            vk::DescriptorPoolSize { ty: vk::DescriptorType::SAMPLED_IMAGE, descriptor_count: DESCRIPTOR_SET_COUNT },
            vk::DescriptorPoolSize { ty: vk::DescriptorType::SAMPLER, descriptor_count: DESCRIPTOR_SET_COUNT },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(DESCRIPTOR_SET_COUNT)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None)? };

        let set_layouts: Vec<_> = (0..DESCRIPTOR_SET_COUNT).map(|_| descriptor_set_layout).collect();
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&set_layouts);
        let descriptor_sets = unsafe { device.allocate_descriptor_sets(&alloc_info)? };

        Ok(FlipPipeline {
            pipeline_layout,
            descriptor_set_layout,
            pipelines: pipelines.try_into().unwrap_or_else(|_| unreachable!()),
            descriptor_pool,
            descriptor_sets: descriptor_sets.try_into().unwrap_or_else(|_| unreachable!()),
            slots: SlotPool::new(),
        })
    }

    pub fn pipeline(&self, flip_type: FlipType) -> vk::Pipeline {
        self.pipelines[flip_type as usize]
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Claims a descriptor set, writes `image_view`/`sampler` into it, and
    /// registers the set's release once `scheduler`'s current submission
    /// retires. Returns the set plus which pipeline to bind, matching
    /// `FlipPipeline::bind`'s return shape.
    ///
    /// # Safety
    /// `device` must be the device this pipeline was created against,
    /// `image_view` must be a sampled-image-usable view, and the returned
    /// descriptor set must only be used for the submission that triggers
    /// `scheduler`'s next `submit()`.
    pub unsafe fn bind(
        &self,
        device: &ash::Device,
        scheduler: &Arc<Scheduler>,
        flip_type: FlipType,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<(vk::DescriptorSet, vk::Pipeline), FlipError> {
        let index = self.slots.acquire().ok_or(FlipError::DescriptorPoolExhausted)?;
        let set = self.descriptor_sets[index as usize];

        let image_info = [vk::DescriptorImageInfo::default()
            .image_view(image_view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let sampler_info = [vk::DescriptorImageInfo::default().sampler(sampler)];
        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .image_info(&image_info),
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .image_info(&sampler_info),
        ];
        unsafe { device.update_descriptor_sets(&writes, &[]) };

        // SAFETY-ADJACENT: the pool itself lives as long as `self`; the
        // closure only needs the bitmask back, not a device handle.
        let slots_ptr: *const AtomicU16 = &self.slots.bitmask;
        scheduler.after_submit(Box::new(move || {
            unsafe { &*slots_ptr }.fetch_and(!(1u16 << index), Ordering::AcqRel);
        }));

        Ok((set, self.pipeline(flip_type)))
    }

    /// # Safety
    /// `device` must be the same device `new` was called with, and no
    /// in-flight command buffer may still reference these pipelines or
    /// descriptor sets.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            for &pipeline in &self.pipelines {
                device.destroy_pipeline(pipeline, None);
            }
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }
    }
}
