use super::capabilities::DeviceCapabilities;
use super::handles::*;
use super::types::*;
use crate::Result;

/// The low-level explicit graphics API as seen by the lifecycle core.
///
/// Implementations must be callable from any thread. Recording calls on a
/// single command buffer are externally synchronized by the caller, like the
/// underlying API requires.
pub trait GpuDevice: Send + Sync {
    fn capabilities(&self) -> &DeviceCapabilities;

    // Command pools and buffers.
    fn create_command_pool(&self, transient: bool) -> Result<CommandPoolHandle>;
    fn reset_command_pool(&self, pool: CommandPoolHandle) -> Result<()>;
    fn destroy_command_pool(&self, pool: CommandPoolHandle);
    fn allocate_command_buffers(
        &self,
        pool: CommandPoolHandle,
        level: CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<CommandBufferHandle>>;
    fn begin_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        desc: &CommandBufferBeginDesc,
    ) -> Result<()>;
    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()>;

    // Recording.
    fn cmd_begin_render_pass(
        &self,
        command_buffer: CommandBufferHandle,
        desc: &RenderPassBeginDesc,
    );
    fn cmd_next_subpass(&self, command_buffer: CommandBufferHandle, contents: SubpassContents);
    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle);
    fn cmd_execute_commands(
        &self,
        command_buffer: CommandBufferHandle,
        secondaries: &[CommandBufferHandle],
    );
    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, viewport: &Viewport);
    fn cmd_bind_pipeline(
        &self,
        command_buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    );
    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: CommandBufferHandle,
        first_binding: u32,
        buffers: &[BufferHandle],
        offsets: &[u64],
    );
    fn cmd_bind_index_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    );
    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    );
    fn cmd_draw(&self, command_buffer: CommandBufferHandle, range: &DrawRange);
    fn cmd_draw_indexed(&self, command_buffer: CommandBufferHandle, range: &IndexedDrawRange);
    fn cmd_dispatch(&self, command_buffer: CommandBufferHandle, x: u32, y: u32, z: u32);
    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    );
    /// Full memory barrier making host and transfer writes visible to
    /// every later stage.
    fn cmd_memory_barrier(&self, command_buffer: CommandBufferHandle);
    fn cmd_reset_query_pool(
        &self,
        command_buffer: CommandBufferHandle,
        pool: QueryPoolHandle,
        first: u32,
        count: u32,
    );
    fn cmd_write_timestamp(
        &self,
        command_buffer: CommandBufferHandle,
        pool: QueryPoolHandle,
        query: u32,
    );
    fn cmd_insert_marker(&self, command_buffer: CommandBufferHandle, label: &str);

    // Synchronization.
    fn create_fence(&self, signaled: bool) -> Result<FenceHandle>;
    fn destroy_fence(&self, fence: FenceHandle);
    fn reset_fences(&self, fences: &[FenceHandle]) -> Result<()>;
    /// Waits until every fence is signaled. `AshError::DeviceLost` is the
    /// only fatal outcome.
    fn wait_for_fences(&self, fences: &[FenceHandle], timeout_ns: u64) -> Result<FenceStatus>;
    fn create_semaphore(&self) -> Result<SemaphoreHandle>;
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);
    /// Submits one batch to the graphics queue. A batch without command
    /// buffers only signals `fence` once all earlier work completed.
    fn queue_submit(&self, batch: &SubmitBatch<'_>, fence: FenceHandle) -> Result<()>;
    fn wait_idle(&self) -> Result<()>;

    // Derived objects.
    fn create_render_pass(&self, desc: &RenderPassCreateDesc) -> Result<RenderPassHandle>;
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);
    fn create_framebuffer(&self, desc: &FramebufferCreateDesc) -> Result<FramebufferHandle>;
    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<PipelineHandle>;
    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<PipelineHandle>;
    fn destroy_pipeline(&self, pipeline: PipelineHandle);
    fn create_pipeline_cache(&self, initial_data: &[u8]) -> Result<PipelineCacheHandle>;
    fn pipeline_cache_data(&self, cache: PipelineCacheHandle) -> Result<Vec<u8>>;
    fn destroy_pipeline_cache(&self, cache: PipelineCacheHandle);

    // Resources.
    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferHandle>;
    /// Writes host data into a host-visible buffer.
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()>;
    fn destroy_buffer(&self, buffer: BufferHandle);
    fn create_texture(&self, desc: &TextureDesc) -> Result<ImageAllocation>;
    fn destroy_texture(&self, texture: ImageAllocation);
    fn create_sampler(&self, desc: &SamplerDesc, anisotropy: f32) -> Result<SamplerHandle>;
    fn destroy_sampler(&self, sampler: SamplerHandle);
    fn create_query_pool(&self, kind: QueryKind, count: u32) -> Result<QueryPoolHandle>;
    fn destroy_query_pool(&self, pool: QueryPoolHandle);
    fn create_descriptor_set(&self, desc: &DescriptorSetDesc) -> Result<DescriptorAllocation>;
    fn destroy_descriptor_set(&self, allocation: DescriptorAllocation);
}
