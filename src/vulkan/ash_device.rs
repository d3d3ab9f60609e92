//! [`GpuDevice`] over a real Vulkan driver.
//!
//! One graphics queue, one `vk-mem` allocator. Raw Vulkan handles are stored
//! in the `u64` handle newtypes via [`vk::Handle`].

use std::collections::{HashMap, HashSet};
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;

use ash::vk::Handle;
use ash::{ext::debug_utils, vk};
use log::{debug, info, warn};
use parking_lot::Mutex;
use vk_mem::Alloc;

use super::capabilities::DeviceCapabilities;
use super::device::GpuDevice;
use super::handles::*;
use super::instance::VulkanInstance;
use super::types::*;
use crate::{AshError, Result};

const ALL_FORMATS: [Format; 12] = [
    Format::R8G8B8A8Unorm,
    Format::R8G8B8A8Srgb,
    Format::B8G8R8A8Unorm,
    Format::B8G8R8A8Srgb,
    Format::R16G16B16A16Sfloat,
    Format::R32Sfloat,
    Format::R32G32Sfloat,
    Format::R32G32B32Sfloat,
    Format::R32G32B32A32Sfloat,
    Format::D16Unorm,
    Format::D24UnormS8Uint,
    Format::D32Sfloat,
];

struct BufferAllocation {
    allocation: vk_mem::Allocation,
    memory: MemoryHint,
    size: u64,
}

/// Vulkan device with a graphics queue and a memory allocator.
pub struct AshDevice {
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: Mutex<vk::Queue>,
    queue_family: u32,
    allocator: ManuallyDrop<vk_mem::Allocator>,
    buffers: Mutex<HashMap<u64, BufferAllocation>>,
    images: Mutex<HashMap<u64, vk_mem::Allocation>>,
    debug_device: Option<debug_utils::Device>,
    capabilities: DeviceCapabilities,
    // Dropped after the device.
    instance: VulkanInstance,
}

impl AshDevice {
    /// Opens the first discrete GPU with a graphics queue, or the first
    /// device with one when there is no discrete GPU. Validation layers are
    /// requested when the `validation` feature is enabled.
    pub fn new() -> Result<Self> {
        Self::with_validation(cfg!(feature = "validation"))
    }

    pub fn with_validation(enable_validation: bool) -> Result<Self> {
        let instance = VulkanInstance::new(enable_validation)?;
        let (physical_device, queue_family) = Self::pick_physical_device(&instance)?;
        let vk_instance = instance.instance();

        let (properties, features) = unsafe {
            (
                vk_instance.get_physical_device_properties(physical_device),
                vk_instance.get_physical_device_features(physical_device),
            )
        };

        let enabled_features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(features.sampler_anisotropy == vk::TRUE)
            .tessellation_shader(features.tessellation_shader == vk::TRUE)
            .geometry_shader(features.geometry_shader == vk::TRUE);

        let priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities)];
        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_features(&enabled_features);

        let device = unsafe { vk_instance.create_device(physical_device, &device_info, None) }
            .map_err(|e| {
                AshError::DeviceInitFailed(format!("Failed to create logical device: {e:?}"))
            })?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let mut allocator_info =
            vk_mem::AllocatorCreateInfo::new(vk_instance, &device, physical_device);
        allocator_info.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = match unsafe { vk_mem::Allocator::new(allocator_info) } {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(AshError::DeviceInitFailed(format!(
                    "Failed to create memory allocator: {e:?}"
                )));
            }
        };

        let debug_device = instance
            .has_debug_utils()
            .then(|| debug_utils::Device::new(vk_instance, &device));

        let capabilities = Self::query_capabilities(
            &instance,
            physical_device,
            &properties,
            &features,
            debug_device.is_some(),
        );
        info!(
            "Opened {} (max samples {}, max anisotropy {})",
            capabilities.device_name, capabilities.max_samples, capabilities.max_anisotropy
        );

        Ok(Self {
            physical_device,
            device,
            queue: Mutex::new(queue),
            queue_family,
            allocator: ManuallyDrop::new(allocator),
            buffers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            debug_device,
            capabilities,
            instance,
        })
    }

    pub fn instance(&self) -> &VulkanInstance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn raw_device(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    fn pick_physical_device(instance: &VulkanInstance) -> Result<(vk::PhysicalDevice, u32)> {
        let vk_instance = instance.instance();
        let devices = unsafe { vk_instance.enumerate_physical_devices() }.map_err(|e| {
            AshError::DeviceInitFailed(format!("Failed to enumerate physical devices: {e:?}"))
        })?;

        let candidates: Vec<_> = devices
            .into_iter()
            .filter_map(|pdevice| {
                let families =
                    unsafe { vk_instance.get_physical_device_queue_family_properties(pdevice) };
                let family = families
                    .iter()
                    .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;
                let properties = unsafe { vk_instance.get_physical_device_properties(pdevice) };
                Some((pdevice, family as u32, properties.device_type))
            })
            .collect();

        candidates
            .iter()
            .find(|(_, _, kind)| *kind == vk::PhysicalDeviceType::DISCRETE_GPU)
            .or_else(|| candidates.first())
            .map(|&(pdevice, family, _)| (pdevice, family))
            .ok_or_else(|| {
                AshError::DeviceInitFailed("No GPU with a graphics queue found".to_string())
            })
    }

    fn query_capabilities(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
        properties: &vk::PhysicalDeviceProperties,
        features: &vk::PhysicalDeviceFeatures,
        debug_markers: bool,
    ) -> DeviceCapabilities {
        let limits = &properties.limits;
        let sample_counts =
            limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
        let max_samples = [64u32, 32, 16, 8, 4, 2]
            .into_iter()
            .find(|&count| sample_counts.contains(vk::SampleCountFlags::from_raw(count)))
            .unwrap_or(1);

        let supported_formats: HashSet<Format> = ALL_FORMATS
            .into_iter()
            .filter(|&format| {
                let props = unsafe {
                    instance
                        .instance()
                        .get_physical_device_format_properties(physical_device, vk_format(format))
                };
                let needed = if format.is_depth_stencil() {
                    vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                } else {
                    vk::FormatFeatureFlags::SAMPLED_IMAGE
                };
                props.optimal_tiling_features.contains(needed)
            })
            .collect();

        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        DeviceCapabilities {
            device_name,
            api_version: properties.api_version,
            max_samples,
            max_anisotropy: if features.sampler_anisotropy == vk::TRUE {
                limits.max_sampler_anisotropy
            } else {
                1.0
            },
            max_push_constant_size: limits.max_push_constants_size,
            supported_formats,
            derivative_pipelines: true,
            debug_markers,
            timestamp_period: limits.timestamp_period,
        }
    }

    fn map_pipeline_result(
        result: std::result::Result<Vec<vk::Pipeline>, (Vec<vk::Pipeline>, vk::Result)>,
    ) -> Result<PipelineHandle> {
        match result {
            Ok(pipelines) => pipelines
                .first()
                .map(|pipeline| PipelineHandle(pipeline.as_raw()))
                .ok_or_else(|| AshError::VulkanError("no pipeline returned".to_string())),
            Err((_, e)) => Err(e.into()),
        }
    }
}

impl Drop for AshDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!("Device wait idle failed during shutdown: {e:?}");
            }

            let buffers = std::mem::take(&mut *self.buffers.lock());
            if !buffers.is_empty() {
                warn!("{} buffers still alive at device shutdown", buffers.len());
            }
            for (raw, mut buffer) in buffers {
                self.allocator
                    .destroy_buffer(vk::Buffer::from_raw(raw), &mut buffer.allocation);
            }
            let images = std::mem::take(&mut *self.images.lock());
            for (raw, mut allocation) in images {
                self.allocator
                    .destroy_image(vk::Image::from_raw(raw), &mut allocation);
            }

            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        debug!("Vulkan device destroyed");
    }
}

fn vk_format(format: Format) -> vk::Format {
    match format {
        Format::Undefined => vk::Format::UNDEFINED,
        Format::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::R8G8B8A8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::B8G8R8A8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::R16G16B16A16Sfloat => vk::Format::R16G16B16A16_SFLOAT,
        Format::R32Sfloat => vk::Format::R32_SFLOAT,
        Format::R32G32Sfloat => vk::Format::R32G32_SFLOAT,
        Format::R32G32B32Sfloat => vk::Format::R32G32B32_SFLOAT,
        Format::R32G32B32A32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
        Format::D16Unorm => vk::Format::D16_UNORM,
        Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        Format::D32Sfloat => vk::Format::D32_SFLOAT,
    }
}

fn vk_samples(samples: u32) -> vk::SampleCountFlags {
    vk::SampleCountFlags::from_raw(samples.max(1))
}

fn vk_load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

fn vk_store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

fn vk_contents(contents: SubpassContents) -> vk::SubpassContents {
    match contents {
        SubpassContents::Inline => vk::SubpassContents::INLINE,
        SubpassContents::SecondaryCommandBuffers => vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
    }
}

fn vk_bind_point(bind_point: PipelineBindPoint) -> vk::PipelineBindPoint {
    match bind_point {
        PipelineBindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
        PipelineBindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
    }
}

fn vk_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

fn vk_topology(primitive: PrimitiveType) -> vk::PrimitiveTopology {
    match primitive {
        PrimitiveType::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveType::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveType::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveType::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveType::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveType::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
        PrimitiveType::PatchList => vk::PrimitiveTopology::PATCH_LIST,
    }
}

fn vk_filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

fn vk_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    }
}

fn vk_descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
    }
}

fn vk_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    for (bit, flag) in [
        (BufferUsage::VERTEX, vk::BufferUsageFlags::VERTEX_BUFFER),
        (BufferUsage::INDEX, vk::BufferUsageFlags::INDEX_BUFFER),
        (BufferUsage::UNIFORM, vk::BufferUsageFlags::UNIFORM_BUFFER),
        (BufferUsage::STORAGE, vk::BufferUsageFlags::STORAGE_BUFFER),
        (BufferUsage::INDIRECT, vk::BufferUsageFlags::INDIRECT_BUFFER),
        (BufferUsage::TRANSFER_SRC, vk::BufferUsageFlags::TRANSFER_SRC),
        (BufferUsage::TRANSFER_DST, vk::BufferUsageFlags::TRANSFER_DST),
    ] {
        if usage.contains(bit) {
            flags |= flag;
        }
    }
    flags
}

fn vk_clear_value(value: &ClearValue) -> vk::ClearValue {
    match *value {
        ClearValue::Color(color) => vk::ClearValue {
            color: vk::ClearColorValue {
                float32: color.to_array(),
            },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    }
}

fn attachment_ref(attachment: u32, layout: vk::ImageLayout) -> vk::AttachmentReference {
    vk::AttachmentReference { attachment, layout }
}

impl GpuDevice for AshDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn create_command_pool(&self, transient: bool) -> Result<CommandPoolHandle> {
        let mut flags = vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;
        if transient {
            flags |= vk::CommandPoolCreateFlags::TRANSIENT;
        }
        let info = vk::CommandPoolCreateInfo::default()
            .flags(flags)
            .queue_family_index(self.queue_family);
        let pool = unsafe { self.device.create_command_pool(&info, None) }?;
        Ok(CommandPoolHandle(pool.as_raw()))
    }

    fn reset_command_pool(&self, pool: CommandPoolHandle) -> Result<()> {
        unsafe {
            self.device.reset_command_pool(
                vk::CommandPool::from_raw(pool.raw()),
                vk::CommandPoolResetFlags::empty(),
            )
        }?;
        Ok(())
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        unsafe {
            self.device
                .destroy_command_pool(vk::CommandPool::from_raw(pool.raw()), None)
        };
    }

    fn allocate_command_buffers(
        &self,
        pool: CommandPoolHandle,
        level: CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<CommandBufferHandle>> {
        let level = match level {
            CommandBufferLevel::Primary => vk::CommandBufferLevel::PRIMARY,
            CommandBufferLevel::Secondary => vk::CommandBufferLevel::SECONDARY,
        };
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(vk::CommandPool::from_raw(pool.raw()))
            .level(level)
            .command_buffer_count(count);
        let buffers = unsafe { self.device.allocate_command_buffers(&info) }?;
        Ok(buffers
            .into_iter()
            .map(|buffer| CommandBufferHandle(buffer.as_raw()))
            .collect())
    }

    fn begin_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        desc: &CommandBufferBeginDesc,
    ) -> Result<()> {
        let mut flags = vk::CommandBufferUsageFlags::empty();
        if desc.one_time_submit {
            flags |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        }
        if desc.simultaneous_use {
            flags |= vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
        }

        let mut inheritance = vk::CommandBufferInheritanceInfo::default();
        if let Some(inherit) = desc.inheritance {
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
            inheritance = inheritance
                .render_pass(vk::RenderPass::from_raw(inherit.render_pass.raw()))
                .subpass(inherit.subpass)
                .framebuffer(vk::Framebuffer::from_raw(inherit.framebuffer.raw()));
        }

        let info = vk::CommandBufferBeginInfo::default()
            .flags(flags)
            .inheritance_info(&inheritance);
        unsafe {
            self.device
                .begin_command_buffer(vk::CommandBuffer::from_raw(command_buffer.raw()), &info)
        }?;
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()> {
        unsafe {
            self.device
                .end_command_buffer(vk::CommandBuffer::from_raw(command_buffer.raw()))
        }?;
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: CommandBufferHandle,
        desc: &RenderPassBeginDesc,
    ) {
        let clear_values: Vec<_> = desc.clear_values.iter().map(vk_clear_value).collect();
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(vk::RenderPass::from_raw(desc.render_pass.raw()))
            .framebuffer(vk::Framebuffer::from_raw(desc.framebuffer.raw()))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D {
                    x: desc.area.x,
                    y: desc.area.y,
                },
                extent: vk::Extent2D {
                    width: desc.area.width,
                    height: desc.area.height,
                },
            })
            .clear_values(&clear_values);
        unsafe {
            self.device.cmd_begin_render_pass(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                &info,
                vk_contents(desc.contents),
            )
        };
    }

    fn cmd_next_subpass(&self, command_buffer: CommandBufferHandle, contents: SubpassContents) {
        unsafe {
            self.device.cmd_next_subpass(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                vk_contents(contents),
            )
        };
    }

    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle) {
        unsafe {
            self.device
                .cmd_end_render_pass(vk::CommandBuffer::from_raw(command_buffer.raw()))
        };
    }

    fn cmd_execute_commands(
        &self,
        command_buffer: CommandBufferHandle,
        secondaries: &[CommandBufferHandle],
    ) {
        let secondaries: Vec<_> = secondaries
            .iter()
            .map(|buffer| vk::CommandBuffer::from_raw(buffer.raw()))
            .collect();
        unsafe {
            self.device.cmd_execute_commands(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                &secondaries,
            )
        };
    }

    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, viewport: &Viewport) {
        let cb = vk::CommandBuffer::from_raw(command_buffer.raw());
        let size = viewport.max - viewport.min;
        let vk_viewport = vk::Viewport {
            x: viewport.min.x,
            y: viewport.min.y,
            width: size.x,
            height: size.y,
            min_depth: viewport.min.z,
            max_depth: viewport.max.z,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: viewport.min.x as i32,
                y: viewport.min.y as i32,
            },
            extent: vk::Extent2D {
                width: size.x.max(0.0) as u32,
                height: size.y.max(0.0) as u32,
            },
        };
        unsafe {
            self.device.cmd_set_viewport(cb, 0, &[vk_viewport]);
            self.device.cmd_set_scissor(cb, 0, &[scissor]);
        }
    }

    fn cmd_bind_pipeline(
        &self,
        command_buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    ) {
        unsafe {
            self.device.cmd_bind_pipeline(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                vk_bind_point(bind_point),
                vk::Pipeline::from_raw(pipeline.raw()),
            )
        };
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: CommandBufferHandle,
        first_binding: u32,
        buffers: &[BufferHandle],
        offsets: &[u64],
    ) {
        let buffers: Vec<_> = buffers
            .iter()
            .map(|buffer| vk::Buffer::from_raw(buffer.raw()))
            .collect();
        unsafe {
            self.device.cmd_bind_vertex_buffers(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                first_binding,
                &buffers,
                offsets,
            )
        };
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    ) {
        let index_type = match index_type {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        };
        unsafe {
            self.device.cmd_bind_index_buffer(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                vk::Buffer::from_raw(buffer.raw()),
                offset,
                index_type,
            )
        };
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                vk_bind_point(bind_point),
                vk::PipelineLayout::from_raw(layout.raw()),
                set_index,
                &[vk::DescriptorSet::from_raw(set.raw())],
                &[],
            )
        };
    }

    fn cmd_draw(&self, command_buffer: CommandBufferHandle, range: &DrawRange) {
        unsafe {
            self.device.cmd_draw(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                range.vertex_count,
                range.instance_count,
                range.first_vertex,
                range.first_instance,
            )
        };
    }

    fn cmd_draw_indexed(&self, command_buffer: CommandBufferHandle, range: &IndexedDrawRange) {
        unsafe {
            self.device.cmd_draw_indexed(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                range.index_count,
                range.instance_count,
                range.first_index,
                range.vertex_offset,
                range.first_instance,
            )
        };
    }

    fn cmd_dispatch(&self, command_buffer: CommandBufferHandle, x: u32, y: u32, z: u32) {
        unsafe {
            self.device
                .cmd_dispatch(vk::CommandBuffer::from_raw(command_buffer.raw()), x, y, z)
        };
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    ) {
        let regions: Vec<_> = regions
            .iter()
            .map(|region| vk::BufferCopy {
                src_offset: region.src_offset,
                dst_offset: region.dst_offset,
                size: region.size,
            })
            .collect();
        unsafe {
            self.device.cmd_copy_buffer(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                vk::Buffer::from_raw(src.raw()),
                vk::Buffer::from_raw(dst.raw()),
                &regions,
            )
        };
    }

    fn cmd_memory_barrier(&self, command_buffer: CommandBufferHandle) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE | vk::AccessFlags::HOST_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);
        unsafe {
            self.device.cmd_pipeline_barrier(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            )
        };
    }

    fn cmd_reset_query_pool(
        &self,
        command_buffer: CommandBufferHandle,
        pool: QueryPoolHandle,
        first: u32,
        count: u32,
    ) {
        unsafe {
            self.device.cmd_reset_query_pool(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                vk::QueryPool::from_raw(pool.raw()),
                first,
                count,
            )
        };
    }

    fn cmd_write_timestamp(
        &self,
        command_buffer: CommandBufferHandle,
        pool: QueryPoolHandle,
        query: u32,
    ) {
        unsafe {
            self.device.cmd_write_timestamp(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::QueryPool::from_raw(pool.raw()),
                query,
            )
        };
    }

    fn cmd_insert_marker(&self, command_buffer: CommandBufferHandle, label: &str) {
        let Some(debug_device) = &self.debug_device else {
            return;
        };
        let Ok(name) = CString::new(label) else {
            warn!("Marker label {label:?} contains a NUL byte");
            return;
        };
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
        unsafe {
            debug_device.cmd_insert_debug_utils_label(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                &label,
            )
        };
    }

    fn create_fence(&self, signaled: bool) -> Result<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }?;
        Ok(FenceHandle(fence.as_raw()))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        unsafe { self.device.destroy_fence(vk::Fence::from_raw(fence.raw()), None) };
    }

    fn reset_fences(&self, fences: &[FenceHandle]) -> Result<()> {
        let fences: Vec<_> = fences
            .iter()
            .map(|fence| vk::Fence::from_raw(fence.raw()))
            .collect();
        unsafe { self.device.reset_fences(&fences) }?;
        Ok(())
    }

    fn wait_for_fences(&self, fences: &[FenceHandle], timeout_ns: u64) -> Result<FenceStatus> {
        let fences: Vec<_> = fences
            .iter()
            .map(|fence| vk::Fence::from_raw(fence.raw()))
            .collect();
        match unsafe { self.device.wait_for_fences(&fences, true, timeout_ns) } {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::Timeout),
            Err(e) => Err(e.into()),
        }
    }

    fn create_semaphore(&self) -> Result<SemaphoreHandle> {
        let semaphore = unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }?;
        Ok(SemaphoreHandle(semaphore.as_raw()))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        unsafe {
            self.device
                .destroy_semaphore(vk::Semaphore::from_raw(semaphore.raw()), None)
        };
    }

    fn queue_submit(&self, batch: &SubmitBatch<'_>, fence: FenceHandle) -> Result<()> {
        let command_buffers: Vec<_> = batch
            .command_buffers
            .iter()
            .map(|buffer| vk::CommandBuffer::from_raw(buffer.raw()))
            .collect();
        let wait: Vec<_> = batch
            .wait_semaphores
            .iter()
            .map(|semaphore| vk::Semaphore::from_raw(semaphore.raw()))
            .collect();
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait.len()];
        let signal: Vec<_> = batch
            .signal_semaphores
            .iter()
            .map(|semaphore| vk::Semaphore::from_raw(semaphore.raw()))
            .collect();

        let info = vk::SubmitInfo::default()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal);

        let queue = self.queue.lock();
        unsafe {
            self.device
                .queue_submit(*queue, &[info], vk::Fence::from_raw(fence.raw()))
        }?;
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    fn create_render_pass(&self, desc: &RenderPassCreateDesc) -> Result<RenderPassHandle> {
        let attachments: Vec<_> = desc
            .attachments
            .iter()
            .map(|attachment| {
                let final_layout = if attachment.format.is_depth_stencil() {
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
                } else {
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                };
                let initial_layout = if attachment.load_op == LoadOp::Load {
                    final_layout
                } else {
                    vk::ImageLayout::UNDEFINED
                };
                vk::AttachmentDescription::default()
                    .format(vk_format(attachment.format))
                    .samples(vk_samples(attachment.samples))
                    .load_op(vk_load_op(attachment.load_op))
                    .store_op(vk_store_op(attachment.store_op))
                    .stencil_load_op(vk_load_op(attachment.load_op))
                    .stencil_store_op(vk_store_op(attachment.store_op))
                    .initial_layout(initial_layout)
                    .final_layout(final_layout)
            })
            .collect();

        // References must outlive the subpass descriptions pointing at them.
        struct SubpassRefs {
            inputs: Vec<vk::AttachmentReference>,
            colors: Vec<vk::AttachmentReference>,
            resolves: Vec<vk::AttachmentReference>,
            depth: Option<vk::AttachmentReference>,
        }
        let refs: Vec<SubpassRefs> = desc
            .subpasses
            .iter()
            .map(|subpass| SubpassRefs {
                inputs: subpass
                    .input_attachments
                    .iter()
                    .map(|&index| attachment_ref(index, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL))
                    .collect(),
                colors: subpass
                    .color_attachments
                    .iter()
                    .map(|&index| attachment_ref(index, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
                    .collect(),
                resolves: if subpass.resolve_attachments.iter().any(Option::is_some) {
                    subpass
                        .resolve_attachments
                        .iter()
                        .map(|resolve| {
                            attachment_ref(
                                resolve.unwrap_or(vk::ATTACHMENT_UNUSED),
                                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                            )
                        })
                        .collect()
                } else {
                    Vec::new()
                },
                depth: subpass.depth_stencil_attachment.map(|index| {
                    attachment_ref(index, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                }),
            })
            .collect();

        let subpasses: Vec<_> = refs
            .iter()
            .map(|refs| {
                let mut subpass = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .input_attachments(&refs.inputs)
                    .color_attachments(&refs.colors);
                if !refs.resolves.is_empty() {
                    subpass = subpass.resolve_attachments(&refs.resolves);
                }
                if let Some(depth) = refs.depth.as_ref() {
                    subpass = subpass.depth_stencil_attachment(depth);
                }
                subpass
            })
            .collect();

        let dependencies: Vec<_> = desc
            .dependencies
            .iter()
            .map(|dependency| {
                let flags = if dependency.by_region {
                    vk::DependencyFlags::BY_REGION
                } else {
                    vk::DependencyFlags::empty()
                };
                vk::SubpassDependency::default()
                    .src_subpass(dependency.src_subpass.unwrap_or(vk::SUBPASS_EXTERNAL))
                    .dst_subpass(dependency.dst_subpass.unwrap_or(vk::SUBPASS_EXTERNAL))
                    .src_stage_mask(vk::PipelineStageFlags::ALL_GRAPHICS)
                    .dst_stage_mask(vk::PipelineStageFlags::ALL_GRAPHICS)
                    .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
                    .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
                    .dependency_flags(flags)
            })
            .collect();

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = unsafe { self.device.create_render_pass(&info, None) }?;
        Ok(RenderPassHandle(render_pass.as_raw()))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        unsafe {
            self.device
                .destroy_render_pass(vk::RenderPass::from_raw(render_pass.raw()), None)
        };
    }

    fn create_framebuffer(&self, desc: &FramebufferCreateDesc) -> Result<FramebufferHandle> {
        let attachments: Vec<_> = desc
            .attachments
            .iter()
            .map(|view| vk::ImageView::from_raw(view.raw()))
            .collect();
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(vk::RenderPass::from_raw(desc.render_pass.raw()))
            .attachments(&attachments)
            .width(desc.width)
            .height(desc.height)
            .layers(desc.layers);
        let framebuffer = unsafe { self.device.create_framebuffer(&info, None) }?;
        Ok(FramebufferHandle(framebuffer.as_raw()))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        unsafe {
            self.device
                .destroy_framebuffer(vk::Framebuffer::from_raw(framebuffer.raw()), None)
        };
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<PipelineHandle> {
        let entry_points = desc
            .stages
            .iter()
            .map(|stage| {
                CString::new(stage.entry_point.as_str()).map_err(|_| {
                    AshError::InvalidArgument(format!(
                        "entry point {:?} contains a NUL byte",
                        stage.entry_point
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let stages: Vec<_> = desc
            .stages
            .iter()
            .zip(&entry_points)
            .map(|(stage, name)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk_stage(stage.stage))
                    .module(vk::ShaderModule::from_raw(stage.module.raw()))
                    .name(name)
            })
            .collect();

        let bindings: Vec<_> = desc
            .vertex_formats
            .iter()
            .enumerate()
            .map(|(binding, format)| vk::VertexInputBindingDescription {
                binding: binding as u32,
                stride: format.stride,
                input_rate: if format.instanced {
                    vk::VertexInputRate::INSTANCE
                } else {
                    vk::VertexInputRate::VERTEX
                },
            })
            .collect();
        let attributes: Vec<_> = desc
            .vertex_formats
            .iter()
            .enumerate()
            .flat_map(|(binding, format)| {
                format
                    .attributes
                    .iter()
                    .map(move |attribute| vk::VertexInputAttributeDescription {
                        location: attribute.location,
                        binding: binding as u32,
                        format: vk_format(attribute.format),
                        offset: attribute.offset,
                    })
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk_topology(desc.primitive));
        let tessellation = vk::PipelineTessellationStateCreateInfo::default()
            .patch_control_points(desc.render_state.patch_control_points.max(1));
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let state = &desc.render_state;
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(match state.cull_mode {
                CullMode::None => vk::CullModeFlags::NONE,
                CullMode::Front => vk::CullModeFlags::FRONT,
                CullMode::Back => vk::CullModeFlags::BACK,
            })
            .front_face(if state.front_face_ccw {
                vk::FrontFace::COUNTER_CLOCKWISE
            } else {
                vk::FrontFace::CLOCKWISE
            })
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk_samples(desc.samples));
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(state.depth_test)
            .depth_write_enable(state.depth_write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

        let blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(state.blend)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD);
        let blend_attachments = vec![blend_attachment; desc.color_attachment_count as usize];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut flags = vk::PipelineCreateFlags::empty();
        if desc.allow_derivatives {
            flags |= vk::PipelineCreateFlags::ALLOW_DERIVATIVES;
        }
        if !desc.base_pipeline.is_null() {
            flags |= vk::PipelineCreateFlags::DERIVATIVE;
        }

        let mut info = vk::GraphicsPipelineCreateInfo::default()
            .flags(flags)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(vk::PipelineLayout::from_raw(desc.layout.raw()))
            .render_pass(vk::RenderPass::from_raw(desc.render_pass.raw()))
            .subpass(desc.subpass)
            .base_pipeline_handle(vk::Pipeline::from_raw(desc.base_pipeline.raw()))
            .base_pipeline_index(-1);
        if desc.primitive == PrimitiveType::PatchList {
            info = info.tessellation_state(&tessellation);
        }

        let result = unsafe {
            self.device.create_graphics_pipelines(
                vk::PipelineCache::from_raw(desc.cache.raw()),
                &[info],
                None,
            )
        };
        Self::map_pipeline_result(result)
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<PipelineHandle> {
        let name = CString::new(desc.stage.entry_point.as_str()).map_err(|_| {
            AshError::InvalidArgument(format!(
                "entry point {:?} contains a NUL byte",
                desc.stage.entry_point
            ))
        })?;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(vk::ShaderModule::from_raw(desc.stage.module.raw()))
            .name(&name);
        let info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(vk::PipelineLayout::from_raw(desc.layout.raw()));
        let result = unsafe {
            self.device.create_compute_pipelines(
                vk::PipelineCache::from_raw(desc.cache.raw()),
                &[info],
                None,
            )
        };
        Self::map_pipeline_result(result)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        unsafe {
            self.device
                .destroy_pipeline(vk::Pipeline::from_raw(pipeline.raw()), None)
        };
    }

    fn create_pipeline_cache(&self, initial_data: &[u8]) -> Result<PipelineCacheHandle> {
        let info = vk::PipelineCacheCreateInfo::default().initial_data(initial_data);
        let cache = unsafe { self.device.create_pipeline_cache(&info, None) }?;
        Ok(PipelineCacheHandle(cache.as_raw()))
    }

    fn pipeline_cache_data(&self, cache: PipelineCacheHandle) -> Result<Vec<u8>> {
        let data = unsafe {
            self.device
                .get_pipeline_cache_data(vk::PipelineCache::from_raw(cache.raw()))
        }?;
        Ok(data)
    }

    fn destroy_pipeline_cache(&self, cache: PipelineCacheHandle) {
        unsafe {
            self.device
                .destroy_pipeline_cache(vk::PipelineCache::from_raw(cache.raw()), None)
        };
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferHandle> {
        let info = vk::BufferCreateInfo::default()
            .size(desc.size.max(1))
            .usage(vk_buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_info = match desc.memory {
            MemoryHint::GpuOnly => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            MemoryHint::CpuToGpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::Auto,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            MemoryHint::GpuToCpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::Auto,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                ..Default::default()
            },
        };

        let (buffer, allocation) = unsafe { self.allocator.create_buffer(&info, &alloc_info) }?;
        self.buffers.lock().insert(
            buffer.as_raw(),
            BufferAllocation {
                allocation,
                memory: desc.memory,
                size: desc.size,
            },
        );
        Ok(BufferHandle(buffer.as_raw()))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let mut buffers = self.buffers.lock();
        let entry = buffers
            .get_mut(&buffer.raw())
            .ok_or_else(|| AshError::InvalidArgument(format!("unknown buffer {buffer:?}")))?;
        if entry.memory == MemoryHint::GpuOnly {
            return Err(AshError::InvalidArgument(
                "buffer is not host visible".to_string(),
            ));
        }
        if offset + data.len() as u64 > entry.size {
            return Err(AshError::InvalidArgument(format!(
                "write of {} bytes at {offset} overflows buffer of {} bytes",
                data.len(),
                entry.size
            )));
        }

        unsafe {
            let mapped = self.allocator.map_memory(&mut entry.allocation)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len());
            self.allocator.unmap_memory(&mut entry.allocation);
        }
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let Some(mut entry) = self.buffers.lock().remove(&buffer.raw()) else {
            warn!("Destroying unknown buffer {buffer:?}");
            return;
        };
        unsafe {
            self.allocator
                .destroy_buffer(vk::Buffer::from_raw(buffer.raw()), &mut entry.allocation)
        };
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<ImageAllocation> {
        let format = vk_format(desc.format);
        let depth = desc.format.is_depth_stencil();

        let mut usage = vk::ImageUsageFlags::TRANSFER_DST;
        if desc.sampled {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        if desc.attachment {
            usage |= if depth {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC
            };
        }

        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk_samples(desc.samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, mut allocation) = unsafe { self.allocator.create_image(&info, &alloc_info) }?;

        let aspect_mask = if depth {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                return Err(e.into());
            }
        };

        self.images.lock().insert(image.as_raw(), allocation);
        Ok(ImageAllocation {
            image: ImageHandle(image.as_raw()),
            view: ImageViewHandle(view.as_raw()),
        })
    }

    fn destroy_texture(&self, texture: ImageAllocation) {
        unsafe {
            self.device
                .destroy_image_view(vk::ImageView::from_raw(texture.view.raw()), None)
        };
        let Some(mut allocation) = self.images.lock().remove(&texture.image.raw()) else {
            warn!("Destroying unknown image {:?}", texture.image);
            return;
        };
        unsafe {
            self.allocator
                .destroy_image(vk::Image::from_raw(texture.image.raw()), &mut allocation)
        };
    }

    fn create_sampler(&self, desc: &SamplerDesc, anisotropy: f32) -> Result<SamplerHandle> {
        let address_mode = vk_address_mode(desc.address_mode);
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk_filter(desc.mag_filter))
            .min_filter(vk_filter(desc.min_filter))
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(anisotropy > 1.0)
            .max_anisotropy(anisotropy)
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = unsafe { self.device.create_sampler(&info, None) }?;
        Ok(SamplerHandle(sampler.as_raw()))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        unsafe {
            self.device
                .destroy_sampler(vk::Sampler::from_raw(sampler.raw()), None)
        };
    }

    fn create_query_pool(&self, kind: QueryKind, count: u32) -> Result<QueryPoolHandle> {
        let query_type = match kind {
            QueryKind::Timestamp => vk::QueryType::TIMESTAMP,
            QueryKind::Occlusion => vk::QueryType::OCCLUSION,
        };
        let info = vk::QueryPoolCreateInfo::default()
            .query_type(query_type)
            .query_count(count);
        let pool = unsafe { self.device.create_query_pool(&info, None) }?;
        Ok(QueryPoolHandle(pool.as_raw()))
    }

    fn destroy_query_pool(&self, pool: QueryPoolHandle) {
        unsafe {
            self.device
                .destroy_query_pool(vk::QueryPool::from_raw(pool.raw()), None)
        };
    }

    fn create_descriptor_set(&self, desc: &DescriptorSetDesc) -> Result<DescriptorAllocation> {
        let pool_sizes: Vec<_> = desc
            .pool_sizes
            .iter()
            .map(|&(kind, count)| vk::DescriptorPoolSize {
                ty: vk_descriptor_type(kind),
                descriptor_count: count.max(1),
            })
            .collect();
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { self.device.create_descriptor_pool(&pool_info, None) }?;

        let layouts = [vk::DescriptorSetLayout::from_raw(desc.layout.raw())];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = match unsafe { self.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets,
            Err(e) => {
                unsafe { self.device.destroy_descriptor_pool(pool, None) };
                return Err(e.into());
            }
        };
        let set = sets.first().copied().unwrap_or_default();

        Ok(DescriptorAllocation {
            pool: DescriptorPoolHandle(pool.as_raw()),
            set: DescriptorSetHandle(set.as_raw()),
        })
    }

    fn destroy_descriptor_set(&self, allocation: DescriptorAllocation) {
        // Sets die with their pool.
        unsafe {
            self.device
                .destroy_descriptor_pool(vk::DescriptorPool::from_raw(allocation.pool.raw()), None)
        };
    }
}
