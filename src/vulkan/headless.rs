//! Software device used for headless runs, tests and benchmarks.
//!
//! Nothing is rendered. The device keeps enough bookkeeping to observe the
//! lifecycle core from the outside: which objects are alive, which command
//! buffers reached the queue and in which order, and whether anything was
//! destroyed or reset while the queue could still reference it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};

use super::capabilities::DeviceCapabilities;
use super::device::GpuDevice;
use super::handles::*;
use super::types::*;
use crate::{AshError, Result};

/// Kinds of objects tracked by [`HeadlessDevice::live_count`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    CommandPool,
    CommandBuffer,
    Fence,
    Semaphore,
    RenderPass,
    Framebuffer,
    Pipeline,
    PipelineCache,
    Buffer,
    Texture,
    Sampler,
    QueryPool,
    DescriptorSet,
}

/// When submitted work completes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FenceCompletion {
    /// Work completes as soon as it is submitted.
    #[default]
    Immediate,
    /// Work stays in flight until [`HeadlessDevice::complete_next`] or
    /// [`HeadlessDevice::complete_all`] is called.
    Manual,
}

/// A command as it was recorded.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    BeginRenderPass {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        contents: SubpassContents,
    },
    NextSubpass(SubpassContents),
    EndRenderPass,
    ExecuteCommands(Vec<CommandBufferHandle>),
    SetViewport(Viewport),
    BindPipeline(PipelineBindPoint, PipelineHandle),
    BindVertexBuffers(Vec<BufferHandle>),
    BindIndexBuffer(BufferHandle),
    BindDescriptorSet(DescriptorSetHandle),
    Draw(DrawRange),
    DrawIndexed(IndexedDrawRange),
    Dispatch(u32, u32, u32),
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        regions: Vec<BufferCopy>,
    },
    MemoryBarrier,
    ResetQueryPool(QueryPoolHandle),
    WriteTimestamp(QueryPoolHandle, u32),
    Marker(String),
}

impl RecordedCommand {
    fn referenced_object(&self) -> Vec<u64> {
        match self {
            RecordedCommand::BeginRenderPass {
                render_pass,
                framebuffer,
                ..
            } => vec![render_pass.raw(), framebuffer.raw()],
            RecordedCommand::BindPipeline(_, pipeline) => vec![pipeline.raw()],
            RecordedCommand::BindVertexBuffers(buffers) => {
                buffers.iter().map(|buffer| buffer.raw()).collect()
            }
            RecordedCommand::BindIndexBuffer(buffer) => vec![buffer.raw()],
            RecordedCommand::BindDescriptorSet(set) => vec![set.raw()],
            RecordedCommand::CopyBuffer { src, dst, .. } => vec![src.raw(), dst.raw()],
            RecordedCommand::ResetQueryPool(pool) | RecordedCommand::WriteTimestamp(pool, _) => {
                vec![pool.raw()]
            }
            _ => Vec::new(),
        }
    }
}

struct CommandBufferRecord {
    pool: CommandPoolHandle,
    level: CommandBufferLevel,
    recording: bool,
    commands: Vec<RecordedCommand>,
}

#[derive(Default)]
struct FenceRecord {
    signaled: bool,
    pending: bool,
}

struct PendingBatch {
    fence: FenceHandle,
    command_buffers: HashSet<CommandBufferHandle>,
    referenced: HashSet<u64>,
    commands: Vec<RecordedCommand>,
}

#[derive(Default)]
struct HeadlessState {
    next_handle: u64,
    live: HashMap<ObjectKind, HashSet<u64>>,
    command_buffers: HashMap<CommandBufferHandle, CommandBufferRecord>,
    fences: HashMap<FenceHandle, FenceRecord>,
    pending: VecDeque<PendingBatch>,
    executed: Vec<RecordedCommand>,
    failures: HashMap<ObjectKind, u32>,
    device_lost: bool,
    submit_count: u64,
    host_buffers: HashMap<BufferHandle, Vec<u8>>,
    render_passes: HashMap<RenderPassHandle, RenderPassCreateDesc>,
    graphics_pipelines: HashMap<PipelineHandle, GraphicsPipelineDesc>,
    samplers: HashMap<SamplerHandle, f32>,
    in_flight_violations: u32,
    invalid_destroys: u32,
}

impl HeadlessState {
    fn create(&mut self, kind: ObjectKind) -> Result<u64> {
        if let Some(remaining) = self.failures.get_mut(&kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AshError::OutOfMemory(format!(
                    "injected {kind:?} allocation failure"
                )));
            }
        }

        self.next_handle += 1;
        let handle = self.next_handle;
        self.live.entry(kind).or_default().insert(handle);
        Ok(handle)
    }

    fn destroy(&mut self, kind: ObjectKind, handle: u64) {
        if handle == 0 {
            return;
        }

        let removed = self
            .live
            .get_mut(&kind)
            .map(|set| set.remove(&handle))
            .unwrap_or(false);
        if !removed {
            warn!("Headless device: destroying unknown {kind:?} {handle}");
            self.invalid_destroys += 1;
            return;
        }

        if self
            .pending
            .iter()
            .any(|batch| batch.referenced.contains(&handle))
        {
            error!("Headless device: {kind:?} {handle} destroyed while in flight");
            self.in_flight_violations += 1;
        }
    }

    /// Expands a primary command buffer into the commands the queue would
    /// execute, inlining secondary buffers.
    fn flatten(
        &self,
        command_buffer: CommandBufferHandle,
        depth: u32,
        command_buffers: &mut HashSet<CommandBufferHandle>,
        out: &mut Vec<RecordedCommand>,
    ) {
        let Some(record) = self.command_buffers.get(&command_buffer) else {
            return;
        };
        command_buffers.insert(command_buffer);

        for command in &record.commands {
            out.push(command.clone());
            if let RecordedCommand::ExecuteCommands(secondaries) = command {
                if depth > 0 {
                    continue;
                }
                for secondary in secondaries {
                    self.flatten(*secondary, depth + 1, command_buffers, out);
                }
            }
        }
    }

    fn complete_front(&mut self) -> bool {
        let Some(batch) = self.pending.pop_front() else {
            return false;
        };

        for command in &batch.commands {
            if let RecordedCommand::CopyBuffer { src, dst, regions } = command {
                for region in regions {
                    self.apply_copy(*src, *dst, region);
                }
            }
        }
        self.executed.extend(batch.commands);

        if let Some(fence) = self.fences.get_mut(&batch.fence) {
            fence.pending = false;
            fence.signaled = true;
        }
        true
    }

    fn apply_copy(&mut self, src: BufferHandle, dst: BufferHandle, region: &BufferCopy) {
        let Some(source) = self.host_buffers.get(&src) else {
            return;
        };
        let start = region.src_offset as usize;
        let end = (start + region.size as usize).min(source.len());
        if start >= end {
            return;
        }
        let bytes = source[start..end].to_vec();

        let target = self.host_buffers.entry(dst).or_default();
        let dst_start = region.dst_offset as usize;
        if target.len() < dst_start + bytes.len() {
            target.resize(dst_start + bytes.len(), 0);
        }
        target[dst_start..dst_start + bytes.len()].copy_from_slice(&bytes);
    }

    fn record(&mut self, command_buffer: CommandBufferHandle, command: RecordedCommand) {
        match self.command_buffers.get_mut(&command_buffer) {
            Some(record) if record.recording => record.commands.push(command),
            Some(_) => {
                warn!("Headless device: recording into {command_buffer:?} outside begin/end")
            }
            None => warn!("Headless device: recording into unknown {command_buffer:?}"),
        }
    }
}

/// Device implementation with no GPU behind it.
pub struct HeadlessDevice {
    capabilities: DeviceCapabilities,
    completion: Mutex<FenceCompletion>,
    state: Mutex<HeadlessState>,
    fence_signal: Condvar,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::with_capabilities(DeviceCapabilities::default())
    }

    pub fn with_capabilities(capabilities: DeviceCapabilities) -> Self {
        Self {
            capabilities,
            completion: Mutex::new(FenceCompletion::Immediate),
            state: Mutex::new(HeadlessState::default()),
            fence_signal: Condvar::new(),
        }
    }

    pub fn with_completion(self, completion: FenceCompletion) -> Self {
        *self.completion.lock() = completion;
        self
    }

    pub fn set_completion(&self, completion: FenceCompletion) {
        *self.completion.lock() = completion;
        if completion == FenceCompletion::Immediate {
            self.complete_all();
        }
    }

    /// Completes the oldest in-flight submission. Returns `false` when
    /// nothing was in flight.
    pub fn complete_next(&self) -> bool {
        let completed = self.state.lock().complete_front();
        if completed {
            self.fence_signal.notify_all();
        }
        completed
    }

    /// Completes every in-flight submission in queue order.
    pub fn complete_all(&self) -> usize {
        let mut state = self.state.lock();
        let mut count = 0;
        while state.complete_front() {
            count += 1;
        }
        drop(state);
        if count > 0 {
            self.fence_signal.notify_all();
        }
        count
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Makes the next `count` creations of `kind` fail with
    /// `AshError::OutOfMemory`.
    pub fn fail_next(&self, kind: ObjectKind, count: u32) {
        self.state.lock().failures.insert(kind, count);
    }

    pub fn set_device_lost(&self, lost: bool) {
        self.state.lock().device_lost = lost;
        self.fence_signal.notify_all();
    }

    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.state
            .lock()
            .live
            .get(&kind)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub fn is_alive(&self, kind: ObjectKind, handle: u64) -> bool {
        self.state
            .lock()
            .live
            .get(&kind)
            .is_some_and(|set| set.contains(&handle))
    }

    /// Number of queue submissions so far.
    pub fn submit_count(&self) -> u64 {
        self.state.lock().submit_count
    }

    /// Objects destroyed or command pools reset while in-flight work still
    /// referenced them.
    pub fn in_flight_violations(&self) -> u32 {
        self.state.lock().in_flight_violations
    }

    /// Destroy calls on handles that were never created or already destroyed.
    pub fn invalid_destroys(&self) -> u32 {
        self.state.lock().invalid_destroys
    }

    /// Every command executed by the queue so far, in execution order.
    pub fn executed_commands(&self) -> Vec<RecordedCommand> {
        self.state.lock().executed.clone()
    }

    /// Labels of executed markers, in execution order.
    pub fn executed_markers(&self) -> Vec<String> {
        self.state
            .lock()
            .executed
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::Marker(label) => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_executed(&self) {
        self.state.lock().executed.clear();
    }

    pub fn recorded_commands(&self, command_buffer: CommandBufferHandle) -> Vec<RecordedCommand> {
        self.state
            .lock()
            .command_buffers
            .get(&command_buffer)
            .map(|record| record.commands.clone())
            .unwrap_or_default()
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state.lock().host_buffers.get(&buffer).cloned()
    }

    pub fn render_pass_desc(&self, render_pass: RenderPassHandle) -> Option<RenderPassCreateDesc> {
        self.state.lock().render_passes.get(&render_pass).cloned()
    }

    pub fn graphics_pipeline_desc(&self, pipeline: PipelineHandle) -> Option<GraphicsPipelineDesc> {
        self.state.lock().graphics_pipelines.get(&pipeline).cloned()
    }

    pub fn sampler_anisotropy(&self, sampler: SamplerHandle) -> Option<f32> {
        self.state.lock().samplers.get(&sampler).copied()
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for HeadlessDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn create_command_pool(&self, _transient: bool) -> Result<CommandPoolHandle> {
        self.state
            .lock()
            .create(ObjectKind::CommandPool)
            .map(CommandPoolHandle)
    }

    fn reset_command_pool(&self, pool: CommandPoolHandle) -> Result<()> {
        let mut state = self.state.lock();
        let in_flight = state.pending.iter().any(|batch| {
            batch.command_buffers.iter().any(|command_buffer| {
                state
                    .command_buffers
                    .get(command_buffer)
                    .is_some_and(|record| record.pool == pool)
            })
        });
        if in_flight {
            error!("Headless device: {pool:?} reset while in flight");
            state.in_flight_violations += 1;
        }

        for record in state.command_buffers.values_mut() {
            if record.pool == pool {
                record.recording = false;
                record.commands.clear();
            }
        }
        Ok(())
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        let mut state = self.state.lock();
        let buffers: Vec<_> = state
            .command_buffers
            .iter()
            .filter(|(_, record)| record.pool == pool)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in buffers {
            if state.pending.iter().any(|batch| batch.command_buffers.contains(&handle)) {
                error!("Headless device: {pool:?} destroyed while in flight");
                state.in_flight_violations += 1;
            }
            state.command_buffers.remove(&handle);
            state.destroy(ObjectKind::CommandBuffer, handle.raw());
        }
        state.destroy(ObjectKind::CommandPool, pool.raw());
    }

    fn allocate_command_buffers(
        &self,
        pool: CommandPoolHandle,
        level: CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<CommandBufferHandle>> {
        let mut state = self.state.lock();
        let mut handles = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match state.create(ObjectKind::CommandBuffer) {
                Ok(raw) => {
                    let handle = CommandBufferHandle(raw);
                    state.command_buffers.insert(
                        handle,
                        CommandBufferRecord {
                            pool,
                            level,
                            recording: false,
                            commands: Vec::new(),
                        },
                    );
                    handles.push(handle);
                }
                Err(err) => {
                    for handle in handles {
                        state.command_buffers.remove(&handle);
                        state.destroy(ObjectKind::CommandBuffer, handle.raw());
                    }
                    return Err(err);
                }
            }
        }
        debug!("Headless device: allocated {count} {level:?} command buffers");
        Ok(handles)
    }

    fn begin_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        desc: &CommandBufferBeginDesc,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .command_buffers
            .get_mut(&command_buffer)
            .ok_or_else(|| AshError::InvalidArgument(format!("unknown {command_buffer:?}")))?;
        if record.level == CommandBufferLevel::Secondary && desc.inheritance.is_none() {
            debug!("Headless device: secondary {command_buffer:?} begun without inheritance");
        }
        record.recording = true;
        record.commands.clear();
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .command_buffers
            .get_mut(&command_buffer)
            .ok_or_else(|| AshError::InvalidArgument(format!("unknown {command_buffer:?}")))?;
        if !record.recording {
            return Err(AshError::InvalidState(format!(
                "{command_buffer:?} ended without being begun"
            )));
        }
        record.recording = false;
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: CommandBufferHandle,
        desc: &RenderPassBeginDesc,
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::BeginRenderPass {
                render_pass: desc.render_pass,
                framebuffer: desc.framebuffer,
                contents: desc.contents,
            },
        );
    }

    fn cmd_next_subpass(&self, command_buffer: CommandBufferHandle, contents: SubpassContents) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::NextSubpass(contents));
    }

    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::EndRenderPass);
    }

    fn cmd_execute_commands(
        &self,
        command_buffer: CommandBufferHandle,
        secondaries: &[CommandBufferHandle],
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::ExecuteCommands(secondaries.to_vec()),
        );
    }

    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, viewport: &Viewport) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::SetViewport(*viewport));
    }

    fn cmd_bind_pipeline(
        &self,
        command_buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::BindPipeline(bind_point, pipeline),
        );
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: CommandBufferHandle,
        _first_binding: u32,
        buffers: &[BufferHandle],
        _offsets: &[u64],
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::BindVertexBuffers(buffers.to_vec()),
        );
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        _offset: u64,
        _index_type: IndexType,
    ) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::BindIndexBuffer(buffer));
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: CommandBufferHandle,
        _bind_point: PipelineBindPoint,
        _layout: PipelineLayoutHandle,
        _set_index: u32,
        set: DescriptorSetHandle,
    ) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::BindDescriptorSet(set));
    }

    fn cmd_draw(&self, command_buffer: CommandBufferHandle, range: &DrawRange) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::Draw(*range));
    }

    fn cmd_draw_indexed(&self, command_buffer: CommandBufferHandle, range: &IndexedDrawRange) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::DrawIndexed(*range));
    }

    fn cmd_dispatch(&self, command_buffer: CommandBufferHandle, x: u32, y: u32, z: u32) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::Dispatch(x, y, z));
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_memory_barrier(&self, command_buffer: CommandBufferHandle) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::MemoryBarrier);
    }

    fn cmd_reset_query_pool(
        &self,
        command_buffer: CommandBufferHandle,
        pool: QueryPoolHandle,
        _first: u32,
        _count: u32,
    ) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::ResetQueryPool(pool));
    }

    fn cmd_write_timestamp(
        &self,
        command_buffer: CommandBufferHandle,
        pool: QueryPoolHandle,
        query: u32,
    ) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::WriteTimestamp(pool, query));
    }

    fn cmd_insert_marker(&self, command_buffer: CommandBufferHandle, label: &str) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::Marker(label.to_string()));
    }

    fn create_fence(&self, signaled: bool) -> Result<FenceHandle> {
        let mut state = self.state.lock();
        let handle = FenceHandle(state.create(ObjectKind::Fence)?);
        state.fences.insert(
            handle,
            FenceRecord {
                signaled,
                pending: false,
            },
        );
        Ok(handle)
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        if state.fences.remove(&fence).is_some_and(|record| record.pending) {
            error!("Headless device: {fence:?} destroyed while in flight");
            state.in_flight_violations += 1;
        }
        state.destroy(ObjectKind::Fence, fence.raw());
    }

    fn reset_fences(&self, fences: &[FenceHandle]) -> Result<()> {
        let mut state = self.state.lock();
        for fence in fences {
            let record = state
                .fences
                .get_mut(fence)
                .ok_or_else(|| AshError::InvalidArgument(format!("unknown {fence:?}")))?;
            if record.pending {
                return Err(AshError::InvalidState(format!(
                    "{fence:?} reset while its submission is in flight"
                )));
            }
            record.signaled = false;
        }
        Ok(())
    }

    fn wait_for_fences(&self, fences: &[FenceHandle], timeout_ns: u64) -> Result<FenceStatus> {
        let deadline = Instant::now() + Duration::from_nanos(timeout_ns);
        let mut state = self.state.lock();
        loop {
            if state.device_lost {
                return Err(AshError::DeviceLost);
            }

            let mut all_signaled = true;
            for fence in fences {
                match state.fences.get(fence) {
                    Some(record) => all_signaled &= record.signaled,
                    None => {
                        return Err(AshError::InvalidArgument(format!("unknown {fence:?}")));
                    }
                }
            }
            if all_signaled {
                return Ok(FenceStatus::Signaled);
            }

            if self.fence_signal.wait_until(&mut state, deadline).timed_out() {
                let signaled = fences
                    .iter()
                    .all(|fence| state.fences.get(fence).is_some_and(|record| record.signaled));
                return Ok(if signaled {
                    FenceStatus::Signaled
                } else {
                    FenceStatus::Timeout
                });
            }
        }
    }

    fn create_semaphore(&self) -> Result<SemaphoreHandle> {
        self.state
            .lock()
            .create(ObjectKind::Semaphore)
            .map(SemaphoreHandle)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        self.state
            .lock()
            .destroy(ObjectKind::Semaphore, semaphore.raw());
    }

    fn queue_submit(&self, batch: &SubmitBatch<'_>, fence: FenceHandle) -> Result<()> {
        let mut state = self.state.lock();
        if state.device_lost {
            return Err(AshError::DeviceLost);
        }

        if !fence.is_null() {
            let record = state
                .fences
                .get(&fence)
                .ok_or_else(|| AshError::InvalidArgument(format!("unknown {fence:?}")))?;
            if record.signaled || record.pending {
                return Err(AshError::InvalidState(format!(
                    "{fence:?} submitted while not reset"
                )));
            }
        }

        let mut command_buffers = HashSet::new();
        let mut commands = Vec::new();
        for command_buffer in batch.command_buffers {
            match state.command_buffers.get(command_buffer) {
                Some(record) if record.recording => {
                    return Err(AshError::InvalidState(format!(
                        "{command_buffer:?} submitted while recording"
                    )));
                }
                Some(_) => {}
                None => {
                    return Err(AshError::InvalidArgument(format!(
                        "unknown {command_buffer:?}"
                    )));
                }
            }
            state.flatten(*command_buffer, 0, &mut command_buffers, &mut commands);
        }

        let referenced = commands
            .iter()
            .flat_map(RecordedCommand::referenced_object)
            .collect();

        if let Some(record) = state.fences.get_mut(&fence) {
            record.pending = true;
        }
        state.submit_count += 1;
        state.pending.push_back(PendingBatch {
            fence,
            command_buffers,
            referenced,
            commands,
        });

        if *self.completion.lock() == FenceCompletion::Immediate {
            while state.complete_front() {}
            drop(state);
            self.fence_signal.notify_all();
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.device_lost {
            return Err(AshError::DeviceLost);
        }
        if *self.completion.lock() == FenceCompletion::Manual && !state.pending.is_empty() {
            debug!(
                "Headless device: wait_idle completing {} submissions",
                state.pending.len()
            );
        }
        while state.complete_front() {}
        drop(state);
        self.fence_signal.notify_all();
        Ok(())
    }

    fn create_render_pass(&self, desc: &RenderPassCreateDesc) -> Result<RenderPassHandle> {
        let mut state = self.state.lock();
        let handle = RenderPassHandle(state.create(ObjectKind::RenderPass)?);
        state.render_passes.insert(handle, desc.clone());
        Ok(handle)
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        let mut state = self.state.lock();
        state.render_passes.remove(&render_pass);
        state.destroy(ObjectKind::RenderPass, render_pass.raw());
    }

    fn create_framebuffer(&self, desc: &FramebufferCreateDesc) -> Result<FramebufferHandle> {
        let mut state = self.state.lock();
        let attachment_count = state
            .render_passes
            .get(&desc.render_pass)
            .map(|render_pass| render_pass.attachments.len())
            .ok_or_else(|| AshError::InvalidArgument(format!("unknown {:?}", desc.render_pass)))?;
        if attachment_count != desc.attachments.len() {
            return Err(AshError::InvalidArgument(format!(
                "framebuffer has {} attachments, render pass expects {attachment_count}",
                desc.attachments.len()
            )));
        }
        state.create(ObjectKind::Framebuffer).map(FramebufferHandle)
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        self.state
            .lock()
            .destroy(ObjectKind::Framebuffer, framebuffer.raw());
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<PipelineHandle> {
        let mut state = self.state.lock();
        let handle = PipelineHandle(state.create(ObjectKind::Pipeline)?);
        state.graphics_pipelines.insert(handle, desc.clone());
        Ok(handle)
    }

    fn create_compute_pipeline(&self, _desc: &ComputePipelineDesc) -> Result<PipelineHandle> {
        self.state
            .lock()
            .create(ObjectKind::Pipeline)
            .map(PipelineHandle)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        let mut state = self.state.lock();
        state.graphics_pipelines.remove(&pipeline);
        state.destroy(ObjectKind::Pipeline, pipeline.raw());
    }

    fn create_pipeline_cache(&self, _initial_data: &[u8]) -> Result<PipelineCacheHandle> {
        self.state
            .lock()
            .create(ObjectKind::PipelineCache)
            .map(PipelineCacheHandle)
    }

    fn pipeline_cache_data(&self, cache: PipelineCacheHandle) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let pipelines = state.graphics_pipelines.len() as u32;
        let mut data = b"HEADLESS".to_vec();
        data.extend_from_slice(&cache.raw().to_le_bytes());
        data.extend_from_slice(&pipelines.to_le_bytes());
        Ok(data)
    }

    fn destroy_pipeline_cache(&self, cache: PipelineCacheHandle) {
        self.state
            .lock()
            .destroy(ObjectKind::PipelineCache, cache.raw());
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferHandle> {
        let mut state = self.state.lock();
        let handle = BufferHandle(state.create(ObjectKind::Buffer)?);
        state
            .host_buffers
            .insert(handle, vec![0; desc.size as usize]);
        Ok(handle)
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let contents = state
            .host_buffers
            .get_mut(&buffer)
            .ok_or_else(|| AshError::InvalidArgument(format!("unknown {buffer:?}")))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(AshError::InvalidArgument(format!(
                "write of {} bytes at {offset} overruns {buffer:?}",
                data.len()
            )));
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        state.host_buffers.remove(&buffer);
        state.destroy(ObjectKind::Buffer, buffer.raw());
    }

    fn create_texture(&self, _desc: &TextureDesc) -> Result<ImageAllocation> {
        let mut state = self.state.lock();
        let image = state.create(ObjectKind::Texture)?;
        Ok(ImageAllocation {
            image: ImageHandle(image),
            view: ImageViewHandle(image),
        })
    }

    fn destroy_texture(&self, texture: ImageAllocation) {
        self.state
            .lock()
            .destroy(ObjectKind::Texture, texture.image.raw());
    }

    fn create_sampler(&self, _desc: &SamplerDesc, anisotropy: f32) -> Result<SamplerHandle> {
        let mut state = self.state.lock();
        let handle = SamplerHandle(state.create(ObjectKind::Sampler)?);
        state.samplers.insert(handle, anisotropy);
        Ok(handle)
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        let mut state = self.state.lock();
        state.samplers.remove(&sampler);
        state.destroy(ObjectKind::Sampler, sampler.raw());
    }

    fn create_query_pool(&self, _kind: QueryKind, _count: u32) -> Result<QueryPoolHandle> {
        self.state
            .lock()
            .create(ObjectKind::QueryPool)
            .map(QueryPoolHandle)
    }

    fn destroy_query_pool(&self, pool: QueryPoolHandle) {
        self.state
            .lock()
            .destroy(ObjectKind::QueryPool, pool.raw());
    }

    fn create_descriptor_set(&self, _desc: &DescriptorSetDesc) -> Result<DescriptorAllocation> {
        let mut state = self.state.lock();
        let set = state.create(ObjectKind::DescriptorSet)?;
        Ok(DescriptorAllocation {
            pool: DescriptorPoolHandle(set),
            set: DescriptorSetHandle(set),
        })
    }

    fn destroy_descriptor_set(&self, allocation: DescriptorAllocation) {
        self.state
            .lock()
            .destroy(ObjectKind::DescriptorSet, allocation.set.raw());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded_buffer(device: &HeadlessDevice, label: &str) -> CommandBufferHandle {
        let pool = device.create_command_pool(false).unwrap();
        let cb = device
            .allocate_command_buffers(pool, CommandBufferLevel::Primary, 1)
            .unwrap()[0];
        device
            .begin_command_buffer(cb, &CommandBufferBeginDesc::default())
            .unwrap();
        device.cmd_insert_marker(cb, label);
        device.end_command_buffer(cb).unwrap();
        cb
    }

    #[test]
    fn manual_fences_signal_in_queue_order() {
        let device = HeadlessDevice::new().with_completion(FenceCompletion::Manual);
        let first = device.create_fence(false).unwrap();
        let second = device.create_fence(false).unwrap();
        let a = recorded_buffer(&device, "a");
        let b = recorded_buffer(&device, "b");

        device
            .queue_submit(&SubmitBatch { command_buffers: &[a], ..Default::default() }, first)
            .unwrap();
        device
            .queue_submit(&SubmitBatch { command_buffers: &[b], ..Default::default() }, second)
            .unwrap();

        assert_eq!(device.wait_for_fences(&[first], 0).unwrap(), FenceStatus::Timeout);
        assert!(device.complete_next());
        assert_eq!(device.wait_for_fences(&[first], 0).unwrap(), FenceStatus::Signaled);
        assert_eq!(device.wait_for_fences(&[second], 0).unwrap(), FenceStatus::Timeout);
        device.complete_all();
        assert_eq!(device.executed_markers(), vec!["a", "b"]);
    }

    #[test]
    fn destroying_in_flight_objects_is_flagged() {
        let device = HeadlessDevice::new().with_completion(FenceCompletion::Manual);
        let buffer = device
            .create_buffer(&BufferDesc {
                size: 16,
                usage: BufferUsage::VERTEX,
                memory: MemoryHint::GpuOnly,
            })
            .unwrap();
        let pool = device.create_command_pool(false).unwrap();
        let cb = device
            .allocate_command_buffers(pool, CommandBufferLevel::Primary, 1)
            .unwrap()[0];
        device
            .begin_command_buffer(cb, &CommandBufferBeginDesc::default())
            .unwrap();
        device.cmd_bind_vertex_buffers(cb, 0, &[buffer], &[0]);
        device.end_command_buffer(cb).unwrap();
        device
            .queue_submit(
                &SubmitBatch { command_buffers: &[cb], ..Default::default() },
                FenceHandle::NULL,
            )
            .unwrap();

        device.destroy_buffer(buffer);
        assert_eq!(device.in_flight_violations(), 1);
    }

    #[test]
    fn injected_failures_are_transient() {
        let device = HeadlessDevice::new();
        device.fail_next(ObjectKind::Fence, 1);
        assert!(device.create_fence(false).unwrap_err().is_out_of_memory());
        assert!(device.create_fence(false).is_ok());
    }

    #[test]
    fn device_loss_is_reported_by_waits() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(false).unwrap();
        device.set_device_lost(true);
        assert!(matches!(
            device.wait_for_fences(&[fence], 1_000),
            Err(AshError::DeviceLost)
        ));
    }
}
