//! Command buffer abstraction recorded by the scene and submitted through
//! the renderer's main command buffer.

use std::sync::Arc;

use log::warn;

use super::command_pool::{CommandBufferChunks, CommandPoolResource};
use super::context::RenderContext;
use super::framebuffer::{Framebuffer, RealFramebuffer};
use super::gpu_resources::{DescriptorSet, FenceResource, GfxFence, QueryPool};
use super::render_pass::{RenderPass, RenderPassData};
use super::resource::GpuResource;
use super::shader::{DrawGeometry, Shader};
use crate::vulkan::{
    ClearValue, CommandBufferBeginDesc, CommandBufferHandle, CommandBufferLevel, DrawRange,
    IndexedDrawRange, InheritanceDesc, PipelineBindPoint, RenderArea, RenderPassBeginDesc,
    SubpassContents, Viewport,
};
use crate::{AshError, Result};

/// How a command buffer is used between resets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CommandBufferUsage {
    /// Recorded once, submitted once.
    #[default]
    Standard,
    /// Recorded as a secondary buffer and executed from a primary one.
    Secondary,
    /// May be submitted several times before it is reset.
    MultiSubmit,
    /// Kept across frames; its resources stay referenced until reset.
    MultiFrame,
}

impl CommandBufferUsage {
    pub fn is_secondary(self) -> bool {
        self == CommandBufferUsage::Secondary
    }

    pub fn is_multi_frame(self) -> bool {
        self == CommandBufferUsage::MultiFrame
    }

    /// Whether submitting the buffer leaves its contents in place.
    pub fn keeps_contents(self) -> bool {
        matches!(
            self,
            CommandBufferUsage::MultiSubmit | CommandBufferUsage::MultiFrame
        )
    }

    fn level(self) -> CommandBufferLevel {
        if self.is_secondary() {
            CommandBufferLevel::Secondary
        } else {
            CommandBufferLevel::Primary
        }
    }
}

/// A render pass resolved for recording: derived data, the concrete
/// framebuffer and the surfaces to keep alive.
#[derive(Clone)]
pub struct RenderPassTarget {
    data: Arc<RenderPassData>,
    framebuffer: Arc<RealFramebuffer>,
    surfaces: Vec<Arc<dyn GpuResource>>,
    area: RenderArea,
}

impl RenderPassTarget {
    pub fn new(render_pass: &RenderPass, framebuffer: &Framebuffer) -> Result<Self> {
        let data = render_pass.data()?;
        let real = framebuffer.real_framebuffer(&data)?;
        Ok(Self {
            data,
            framebuffer: real,
            surfaces: framebuffer
                .surfaces()
                .iter()
                .filter_map(|surface| surface.tracked_resource())
                .collect(),
            area: RenderPass::full_area(framebuffer),
        })
    }

    pub fn data(&self) -> &Arc<RenderPassData> {
        &self.data
    }

    pub fn framebuffer(&self) -> &Arc<RealFramebuffer> {
        &self.framebuffer
    }

    pub fn area(&self) -> RenderArea {
        self.area
    }

    pub fn subpass_count(&self) -> u32 {
        self.data.subpass_count()
    }

    /// State a secondary buffer inherits to record into `subpass`.
    pub fn inheritance(&self, subpass: u32) -> RenderPassInheritance {
        RenderPassInheritance {
            data: Arc::clone(&self.data),
            framebuffer: Arc::clone(&self.framebuffer),
            subpass,
            area: self.area,
        }
    }
}

#[derive(Clone)]
pub struct RenderPassInheritance {
    data: Arc<RenderPassData>,
    framebuffer: Arc<RealFramebuffer>,
    subpass: u32,
    area: RenderArea,
}

impl RenderPassInheritance {
    pub fn subpass(&self) -> u32 {
        self.subpass
    }
}

struct BoundRenderPass {
    data: Arc<RenderPassData>,
    subpass: u32,
    contents: SubpassContents,
    inherited: bool,
}

/// Commands detached from the buffer that recorded them, ready to be
/// executed or spliced into another command buffer.
///
/// Holds one command-buffer reference on each tracked resource; dropping it
/// unexecuted releases them.
pub struct RecordedCommands {
    level: CommandBufferLevel,
    buffers: Vec<CommandBufferHandle>,
    resources: Vec<Arc<dyn GpuResource>>,
    fences: Vec<Arc<FenceResource>>,
}

impl RecordedCommands {
    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    pub fn buffers(&self) -> &[CommandBufferHandle] {
        &self.buffers
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Drop for RecordedCommands {
    fn drop(&mut self) {
        for resource in self.resources.drain(..) {
            resource.usage().remove_command_buffer_ref();
        }
    }
}

enum Owner {
    /// The renderer's main command buffer, recording into the submit ring.
    Main,
    Pooled(Arc<CommandPoolResource>),
}

/// Records commands into chunked low-level buffers and tracks every GPU
/// resource they reference.
pub struct CommandBuffer {
    ctx: Arc<RenderContext>,
    usage: CommandBufferUsage,
    owner: Owner,
    chunks: Option<CommandBufferChunks>,
    submit_buffers: Vec<CommandBufferHandle>,
    active: Option<CommandBufferHandle>,
    used_resources: Vec<Arc<dyn GpuResource>>,
    render_pass: Option<BoundRenderPass>,
    fences: Vec<Arc<FenceResource>>,
}

impl CommandBuffer {
    pub(crate) fn main(ctx: &Arc<RenderContext>, chunks: CommandBufferChunks) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            usage: CommandBufferUsage::Standard,
            owner: Owner::Main,
            chunks: Some(chunks),
            submit_buffers: Vec::new(),
            active: None,
            used_resources: Vec::new(),
            render_pass: None,
            fences: Vec::new(),
        }
    }

    pub(crate) fn pooled(
        ctx: &Arc<RenderContext>,
        usage: CommandBufferUsage,
        pool: Arc<CommandPoolResource>,
        chunk_size: u32,
    ) -> Self {
        let chunks = CommandBufferChunks::new(pool.handle(), usage.level(), chunk_size);
        Self {
            ctx: Arc::clone(ctx),
            usage,
            owner: Owner::Pooled(pool),
            chunks: Some(chunks),
            submit_buffers: Vec::new(),
            active: None,
            used_resources: Vec::new(),
            render_pass: None,
            fences: Vec::new(),
        }
    }

    pub fn usage(&self) -> CommandBufferUsage {
        self.usage
    }

    pub fn is_main(&self) -> bool {
        matches!(self.owner, Owner::Main)
    }

    pub fn in_render_pass(&self) -> bool {
        self.render_pass.is_some()
    }

    pub fn subpass(&self) -> Option<u32> {
        self.render_pass.as_ref().map(|bound| bound.subpass)
    }

    /// Low-level buffers recorded so far, in submission order.
    pub fn submit_buffers(&self) -> &[CommandBufferHandle] {
        &self.submit_buffers
    }

    pub fn used_resource_count(&self) -> usize {
        self.used_resources.len()
    }

    /// Keeps `resource` alive until the work recorded here has finished.
    pub fn add_resource(&mut self, resource: Arc<dyn GpuResource>) {
        if let Some(last) = self.used_resources.last() {
            if Arc::as_ptr(last) as *const () == Arc::as_ptr(&resource) as *const () {
                return;
            }
        }
        resource.usage().add_command_buffer_ref();
        self.used_resources.push(resource);
    }

    fn track<R: GpuResource + 'static>(&mut self, resource: &Arc<R>) {
        self.add_resource(Arc::clone(resource) as Arc<dyn GpuResource>);
    }

    /// Buffer currently recorded into, begun on demand.
    fn command_handle(&mut self) -> Result<CommandBufferHandle> {
        if let Some(active) = self.active {
            return Ok(active);
        }
        if self.usage.is_secondary() {
            return self.begin_secondary_buffer(None);
        }

        let chunks = self.chunks.as_mut().ok_or_else(|| {
            AshError::InvalidState("command buffer is not recording".into())
        })?;
        let handle = chunks.next(self.ctx.device())?;
        self.submit_buffers
            .try_reserve(1)
            .map_err(|e| AshError::OutOfMemory(format!("submit buffer list: {e}")))?;

        self.ctx.device().begin_command_buffer(
            handle,
            &CommandBufferBeginDesc {
                one_time_submit: !self.usage.keeps_contents(),
                simultaneous_use: self.usage == CommandBufferUsage::MultiSubmit,
                inheritance: None,
            },
        )?;
        self.submit_buffers.push(handle);
        self.active = Some(handle);
        Ok(handle)
    }

    fn begin_secondary_buffer(
        &mut self,
        inheritance: Option<&RenderPassInheritance>,
    ) -> Result<CommandBufferHandle> {
        let chunks = self.chunks.as_mut().ok_or_else(|| {
            AshError::InvalidState("command buffer is not recording".into())
        })?;
        let handle = chunks.next(self.ctx.device())?;
        self.submit_buffers
            .try_reserve(1)
            .map_err(|e| AshError::OutOfMemory(format!("submit buffer list: {e}")))?;

        self.ctx.device().begin_command_buffer(
            handle,
            &CommandBufferBeginDesc {
                one_time_submit: true,
                simultaneous_use: false,
                inheritance: inheritance.map(|inherited| InheritanceDesc {
                    render_pass: inherited.data.handle(),
                    subpass: inherited.subpass,
                    framebuffer: inherited.framebuffer.handle(),
                }),
            },
        )?;
        self.submit_buffers.push(handle);
        self.active = Some(handle);
        Ok(handle)
    }

    /// Starts a secondary buffer, optionally continuing a subpass.
    pub fn begin_secondary(&mut self, inheritance: Option<&RenderPassInheritance>) -> Result<()> {
        if !self.usage.is_secondary() {
            return Err(AshError::InvalidState(
                "begin_secondary on a primary command buffer".into(),
            ));
        }
        if self.active.is_some() {
            return Err(AshError::InvalidState(
                "secondary command buffer is already recording".into(),
            ));
        }

        let handle = self.begin_secondary_buffer(inheritance)?;
        if let Some(inherited) = inheritance {
            self.track(&inherited.data);
            self.track(&inherited.framebuffer);
            self.ctx.device().cmd_set_viewport(
                handle,
                &Viewport::full(inherited.area.width, inherited.area.height),
            );
            self.render_pass = Some(BoundRenderPass {
                data: Arc::clone(&inherited.data),
                subpass: inherited.subpass,
                contents: SubpassContents::Inline,
                inherited: true,
            });
        }
        Ok(())
    }

    /// Finishes recording. The main command buffer is ended by the flush.
    pub fn end(&mut self) -> Result<()> {
        if self.is_main() {
            return Err(AshError::InvalidState(
                "the main command buffer is ended by flush".into(),
            ));
        }
        if self
            .render_pass
            .as_ref()
            .is_some_and(|bound| !bound.inherited)
        {
            return Err(AshError::InvalidState(
                "command buffer ended inside a render pass".into(),
            ));
        }
        self.render_pass = None;
        self.close_segment()
    }

    fn close_segment(&mut self) -> Result<()> {
        if let Some(active) = self.active.take() {
            self.ctx.device().end_command_buffer(active)?;
        }
        Ok(())
    }

    pub fn begin_render_pass(
        &mut self,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer,
        clear_values: &[ClearValue],
        contents: SubpassContents,
    ) -> Result<()> {
        let target = RenderPassTarget::new(render_pass, framebuffer)?;
        self.begin_target(&target, clear_values, contents)
    }

    /// Begins a render pass that was resolved up front.
    pub fn begin_target(
        &mut self,
        target: &RenderPassTarget,
        clear_values: &[ClearValue],
        contents: SubpassContents,
    ) -> Result<()> {
        if self.usage.is_secondary() {
            return Err(AshError::InvalidState(
                "render passes are begun on primary command buffers".into(),
            ));
        }
        if self.render_pass.is_some() {
            return Err(AshError::InvalidState("render pass already active".into()));
        }

        let handle = self.command_handle()?;
        let device = self.ctx.device();
        device.cmd_begin_render_pass(
            handle,
            &RenderPassBeginDesc {
                render_pass: target.data.handle(),
                framebuffer: target.framebuffer.handle(),
                area: target.area,
                clear_values: clear_values.to_vec(),
                contents,
            },
        );
        if contents == SubpassContents::Inline {
            device.cmd_set_viewport(handle, &Viewport::full(target.area.width, target.area.height));
        }

        self.track(&target.data);
        self.track(&target.framebuffer);
        for surface in &target.surfaces {
            self.add_resource(Arc::clone(surface));
        }
        self.render_pass = Some(BoundRenderPass {
            data: Arc::clone(&target.data),
            subpass: 0,
            contents,
            inherited: false,
        });
        Ok(())
    }

    pub fn next_subpass(&mut self, contents: SubpassContents) -> Result<()> {
        let bound = self.owned_render_pass()?;
        if bound.subpass + 1 >= bound.data.subpass_count() {
            return Err(AshError::InvalidState(format!(
                "no subpass after {} of {}",
                bound.subpass,
                bound.data.subpass_count()
            )));
        }

        let handle = self.command_handle()?;
        let device = self.ctx.device();
        device.cmd_next_subpass(handle, contents);
        if let Some(bound) = self.render_pass.as_mut() {
            bound.subpass += 1;
            bound.contents = contents;
        }
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> Result<()> {
        let bound = self.owned_render_pass()?;
        if bound.subpass + 1 != bound.data.subpass_count() {
            return Err(AshError::InvalidState(format!(
                "render pass ended in subpass {} of {}",
                bound.subpass,
                bound.data.subpass_count()
            )));
        }

        let handle = self.command_handle()?;
        self.ctx.device().cmd_end_render_pass(handle);
        self.render_pass = None;
        Ok(())
    }

    fn owned_render_pass(&self) -> Result<&BoundRenderPass> {
        match self.render_pass.as_ref() {
            Some(bound) if !bound.inherited => Ok(bound),
            Some(_) => Err(AshError::InvalidState(
                "secondary buffers cannot change subpasses".into(),
            )),
            None => Err(AshError::InvalidState("no render pass is active".into())),
        }
    }

    fn draw_target(&self) -> Result<(Arc<RenderPassData>, u32)> {
        match self.render_pass.as_ref() {
            Some(bound) if bound.contents == SubpassContents::Inline => {
                Ok((Arc::clone(&bound.data), bound.subpass))
            }
            Some(_) => Err(AshError::InvalidState(
                "subpass expects secondary command buffers".into(),
            )),
            None => Err(AshError::InvalidState(
                "draw outside of a render pass".into(),
            )),
        }
    }

    /// Resolves and binds the pipeline and vertex input for a draw.
    fn bind_draw_state(
        &mut self,
        shader: &Shader,
        geometry: &DrawGeometry,
    ) -> Result<CommandBufferHandle> {
        let (data, subpass) = self.draw_target()?;
        let pipeline = shader.get_pipeline(geometry, &data, subpass)?;
        let samplers = shader.samplers()?;

        let handle = self.command_handle()?;
        let device = self.ctx.device();
        device.cmd_bind_pipeline(handle, PipelineBindPoint::Graphics, pipeline.handle());
        if !geometry.vertex_buffers().is_empty() {
            let buffers: Vec<_> = geometry
                .vertex_buffers()
                .iter()
                .map(|buffer| buffer.handle())
                .collect();
            let offsets = vec![0; buffers.len()];
            device.cmd_bind_vertex_buffers(handle, 0, &buffers, &offsets);
        }

        self.track(&pipeline);
        if let Some(samplers) = samplers {
            self.track(&samplers);
        }
        for buffer in geometry.vertex_buffers() {
            self.track(buffer);
        }
        Ok(handle)
    }

    /// Draws `geometry` with `shader` in the current subpass.
    ///
    /// Fails without recording anything if the pipeline cannot be built.
    pub fn draw(
        &mut self,
        shader: &Shader,
        geometry: &DrawGeometry,
        range: DrawRange,
    ) -> Result<()> {
        let handle = self.bind_draw_state(shader, geometry)?;
        self.ctx.device().cmd_draw(handle, &range);
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        shader: &Shader,
        geometry: &DrawGeometry,
        range: IndexedDrawRange,
    ) -> Result<()> {
        let (index_buffer, index_type) = geometry.index_buffer().cloned().ok_or_else(|| {
            AshError::InvalidArgument("indexed draw of geometry without indices".into())
        })?;
        let handle = self.bind_draw_state(shader, geometry)?;
        let device = self.ctx.device();
        device.cmd_bind_index_buffer(handle, index_buffer.handle(), 0, index_type);
        device.cmd_draw_indexed(handle, &range);
        self.track(&index_buffer);
        Ok(())
    }

    pub fn dispatch(&mut self, shader: &Shader, x: u32, y: u32, z: u32) -> Result<()> {
        if self.render_pass.is_some() {
            return Err(AshError::InvalidState(
                "dispatch inside a render pass".into(),
            ));
        }
        let pipeline = shader.compute_pipeline().cloned().ok_or_else(|| {
            AshError::InvalidArgument(format!("shader '{}' is not a compute shader", shader.name()))
        })?;
        let samplers = shader.samplers()?;

        let handle = self.command_handle()?;
        let device = self.ctx.device();
        device.cmd_bind_pipeline(handle, PipelineBindPoint::Compute, pipeline.handle());
        device.cmd_dispatch(handle, x, y, z);
        self.track(&pipeline);
        if let Some(samplers) = samplers {
            self.track(&samplers);
        }
        Ok(())
    }

    pub fn bind_descriptor_set(
        &mut self,
        shader: &Shader,
        set_index: u32,
        set: &DescriptorSet,
    ) -> Result<()> {
        let bind_point = if shader.is_compute() {
            PipelineBindPoint::Compute
        } else {
            PipelineBindPoint::Graphics
        };
        let handle = self.command_handle()?;
        self.ctx.device().cmd_bind_descriptor_set(
            handle,
            bind_point,
            shader.layout(),
            set_index,
            set.resource().allocation().set,
        );
        self.track(set.resource());
        Ok(())
    }

    pub fn reset_queries(&mut self, pool: &QueryPool, first: u32, count: u32) -> Result<()> {
        if self.render_pass.is_some() {
            return Err(AshError::InvalidState(
                "query reset inside a render pass".into(),
            ));
        }
        if first.saturating_add(count) > pool.count() {
            return Err(AshError::InvalidArgument(format!(
                "queries {first}..{} out of range for pool of {}",
                first.saturating_add(count),
                pool.count()
            )));
        }
        let handle = self.command_handle()?;
        self.ctx
            .device()
            .cmd_reset_query_pool(handle, pool.resource().handle(), first, count);
        self.track(pool.resource());
        Ok(())
    }

    pub fn write_timestamp(&mut self, pool: &QueryPool, query: u32) -> Result<()> {
        if query >= pool.count() {
            return Err(AshError::InvalidArgument(format!(
                "query {query} out of range for pool of {}",
                pool.count()
            )));
        }
        let handle = self.command_handle()?;
        self.ctx
            .device()
            .cmd_write_timestamp(handle, pool.resource().handle(), query);
        self.track(pool.resource());
        Ok(())
    }

    /// Debug label. The headless device logs executed markers in order.
    pub fn insert_marker(&mut self, label: &str) -> Result<()> {
        let handle = self.command_handle()?;
        self.ctx.device().cmd_insert_marker(handle, label);
        Ok(())
    }

    /// Signals `fence` once the flush that carries this buffer's work has
    /// finished.
    pub fn set_fence(&mut self, fence: &GfxFence) -> Result<()> {
        if fence.is_set() {
            return Err(AshError::InvalidState(
                "fence must be reset before it is set again".into(),
            ));
        }
        self.fences.push(Arc::clone(fence.resource()));
        Ok(())
    }

    /// Submits `other` into this command buffer.
    ///
    /// Secondary buffers are executed in place. Primary buffers end the
    /// current segment and are spliced into the submit list. Unless `other`
    /// is multi-submit or multi-frame its contents are moved out.
    pub fn submit(&mut self, other: &mut CommandBuffer) -> Result<()> {
        if other.is_main() {
            return Err(AshError::InvalidArgument(
                "the main command buffer cannot be submitted".into(),
            ));
        }
        other.end()?;
        let recorded = if other.usage.keeps_contents() {
            other.copy_recorded()
        } else {
            other.take_recorded()
        };
        self.execute(recorded)
    }

    /// Detaches everything recorded so far.
    pub fn take_recorded(&mut self) -> RecordedCommands {
        let mut resources = std::mem::take(&mut self.used_resources);
        if let Owner::Pooled(pool) = &self.owner {
            pool.usage.add_command_buffer_ref();
            resources.push(Arc::clone(pool) as Arc<dyn GpuResource>);
        }
        RecordedCommands {
            level: self.usage.level(),
            buffers: std::mem::take(&mut self.submit_buffers),
            resources,
            fences: std::mem::take(&mut self.fences),
        }
    }

    fn copy_recorded(&mut self) -> RecordedCommands {
        let mut resources: Vec<Arc<dyn GpuResource>> = self
            .used_resources
            .iter()
            .map(|resource| {
                resource.usage().add_command_buffer_ref();
                Arc::clone(resource)
            })
            .collect();
        if let Owner::Pooled(pool) = &self.owner {
            pool.usage.add_command_buffer_ref();
            resources.push(Arc::clone(pool) as Arc<dyn GpuResource>);
        }
        RecordedCommands {
            level: self.usage.level(),
            buffers: self.submit_buffers.clone(),
            resources,
            fences: std::mem::take(&mut self.fences),
        }
    }

    /// Executes or splices commands recorded elsewhere.
    pub fn execute(&mut self, mut recorded: RecordedCommands) -> Result<()> {
        match recorded.level {
            CommandBufferLevel::Secondary => {
                if let Some(bound) = self.render_pass.as_ref() {
                    if bound.inherited
                        || bound.contents != SubpassContents::SecondaryCommandBuffers
                    {
                        return Err(AshError::InvalidState(
                            "subpass does not accept secondary command buffers".into(),
                        ));
                    }
                } else if self.usage.is_secondary() {
                    return Err(AshError::InvalidState(
                        "secondary command buffers cannot be nested".into(),
                    ));
                }
                if !recorded.buffers.is_empty() {
                    let handle = self.command_handle()?;
                    self.ctx
                        .device()
                        .cmd_execute_commands(handle, &recorded.buffers);
                }
            }
            CommandBufferLevel::Primary => {
                if self.usage.is_secondary() || self.render_pass.is_some() {
                    return Err(AshError::InvalidState(
                        "primary command buffers are submitted outside render passes".into(),
                    ));
                }
                if !recorded.buffers.is_empty() {
                    self.close_segment()?;
                    self.submit_buffers
                        .try_reserve(recorded.buffers.len())
                        .map_err(|e| AshError::OutOfMemory(format!("submit buffer list: {e}")))?;
                    self.submit_buffers.append(&mut recorded.buffers);
                }
            }
        }

        self.used_resources.append(&mut recorded.resources);
        self.fences.append(&mut recorded.fences);
        Ok(())
    }

    /// Releases tracked resources without marking them used.
    pub(crate) fn clear_used_resources(&mut self) {
        for resource in self.used_resources.drain(..) {
            resource.usage().remove_command_buffer_ref();
        }
    }

    /// Forgets recorded buffers after the device pool was reset.
    pub(crate) fn recycle(&mut self) {
        if let Some(chunks) = self.chunks.as_mut() {
            chunks.reset();
        }
        self.submit_buffers.clear();
        self.active = None;
        self.render_pass = None;
        if !self.fences.is_empty() {
            warn!("Dropping {} fences that were never submitted", self.fences.len());
            self.fences.clear();
        }
    }

    /// Ends the main command buffer and hands its buffers to the submit
    /// ring.
    pub(crate) fn finish_for_submit(
        &mut self,
    ) -> Result<(Vec<CommandBufferHandle>, CommandBufferChunks)> {
        if self.render_pass.is_some() {
            return Err(AshError::InvalidState(
                "flush inside a render pass".into(),
            ));
        }
        self.close_segment()?;
        let chunks = self.chunks.take().ok_or_else(|| {
            AshError::InvalidState("main command buffer has no chunks to submit".into())
        })?;
        Ok((std::mem::take(&mut self.submit_buffers), chunks))
    }

    /// Marks every tracked resource as used by `submit` and releases it.
    pub(crate) fn submitted(&mut self, submit: u64) {
        for resource in self.used_resources.drain(..) {
            resource.usage().mark_last_used(submit);
            resource.usage().remove_command_buffer_ref();
        }
    }

    pub(crate) fn take_fences(&mut self) -> Vec<Arc<FenceResource>> {
        std::mem::take(&mut self.fences)
    }

    pub(crate) fn has_chunks(&self) -> bool {
        self.chunks.is_some()
    }

    /// Gives the main command buffer the next slot's buffers.
    pub(crate) fn install_chunks(&mut self, chunks: CommandBufferChunks) {
        self.chunks = Some(chunks);
        self.active = None;
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        self.clear_used_resources();
    }
}
