use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};

use super::command_buffer::{CommandBuffer, CommandBufferUsage};
use super::command_pool::CommandBufferPool;
use super::config::RendererConfig;
use super::context::RenderContext;
use super::deletion::DeferredResource;
use super::framebuffer::{Framebuffer, SurfaceSource};
use super::gpu_resources::{
    BufferResource, DescriptorSet, GfxBuffer, GfxFence, QueryPool, Texture, TextureInfo,
};
use super::render_pass::RenderPass;
use super::shader::{Shader, ShaderDesc};
use super::submit::SubmitWait;
use crate::scene::SceneThreadManager;
use crate::vulkan::{
    AttachmentDesc, BufferDesc, DescriptorSetDesc, GpuDevice, HeadlessDevice, QueryKind,
    SemaphoreHandle, SubpassDependency, SubpassDesc,
};
use crate::{AshError, Result};

/// Largest submit ring the renderer accepts.
pub const MAX_SUBMIT_SLOTS: usize = 8;

/// Entry point of the lifecycle core.
///
/// Owns the render context and the main command buffer. Everything recorded
/// into the main command buffer reaches the GPU at the next flush, which
/// also uploads pending buffer data and sweeps the deletion queue.
pub struct Renderer {
    ctx: Arc<RenderContext>,
    main: Mutex<CommandBuffer>,
}

impl Renderer {
    pub fn new(device: Arc<dyn GpuDevice>, config: RendererConfig) -> Result<Self> {
        if config.submit_slots > MAX_SUBMIT_SLOTS {
            return Err(AshError::InvalidArgument(format!(
                "submit ring supports at most {MAX_SUBMIT_SLOTS} slots, got {}",
                config.submit_slots
            )));
        }

        let ctx = RenderContext::new(device, config)?;
        let chunks = ctx.submits().take_chunks().ok_or_else(|| {
            AshError::InvalidState("submit ring has no recording slot".into())
        })?;
        let main = CommandBuffer::main(&ctx, chunks);

        info!("Renderer initialized");
        Ok(Self {
            ctx,
            main: Mutex::new(main),
        })
    }

    /// Renderer over a fresh [`HeadlessDevice`], returned alongside it so the
    /// caller can drive fence completion.
    pub fn headless(config: RendererConfig) -> Result<(Self, Arc<HeadlessDevice>)> {
        let device = Arc::new(HeadlessDevice::new());
        let renderer = Self::new(Arc::clone(&device) as Arc<dyn GpuDevice>, config)?;
        Ok((renderer, device))
    }

    pub fn context(&self) -> &Arc<RenderContext> {
        &self.ctx
    }

    pub fn device(&self) -> &dyn GpuDevice {
        self.ctx.device()
    }

    pub fn config(&self) -> &RendererConfig {
        self.ctx.config()
    }

    /// Command buffer flushed by [`flush`](Self::flush).
    pub fn main_command_buffer(&self) -> MutexGuard<'_, CommandBuffer> {
        self.main.lock()
    }

    pub fn frame_number(&self) -> u64 {
        self.ctx.frame_number()
    }

    pub fn finished_submit(&self) -> u64 {
        self.ctx.finished_submit()
    }

    /// Index the next flush will be submitted as.
    pub fn submit_count(&self) -> u64 {
        self.ctx.submits().submit_count()
    }

    pub fn pending_deletions(&self) -> usize {
        self.ctx.pending_deletions()
    }

    pub fn begin_frame(&self) -> u64 {
        self.ctx.advance_frame()
    }

    pub fn end_frame(&self) -> Result<u64> {
        self.flush()
    }

    /// Submits everything recorded into the main command buffer and returns
    /// the submit index.
    pub fn flush(&self) -> Result<u64> {
        self.flush_inner(&[], false)
    }

    /// Like [`flush`](Self::flush), additionally waiting on
    /// `wait_semaphores` and signaling the semaphore a present should wait
    /// on, which is returned.
    pub fn flush_for_present(
        &self,
        wait_semaphores: &[SemaphoreHandle],
    ) -> Result<(u64, SemaphoreHandle)> {
        let submit = self.flush_inner(wait_semaphores, true)?;
        Ok((submit, self.ctx.submits().present_semaphore()))
    }

    fn flush_inner(&self, wait_semaphores: &[SemaphoreHandle], present: bool) -> Result<u64> {
        let mut main = self.main.lock();
        if main.in_render_pass() {
            return Err(AshError::InvalidState("flush inside a render pass".into()));
        }

        let ctx = &self.ctx;
        let device = ctx.device();
        let submits = ctx.submits();

        // The last flush submitted but timed out recycling the next slot.
        if !main.has_chunks() {
            let chunks = submits.advance()?;
            main.install_chunks(chunks);
        }

        // Uploads are tracked by the main buffer before the sweep so a buffer
        // dropped right after creation still waits for its copy.
        let resource_commands = submits.resource_commands();
        let mut staged = Vec::new();
        for buffer in ctx.take_uploads() {
            if let Some(staging) = buffer.record_upload(device, resource_commands) {
                staged.push((Arc::clone(&buffer), staging));
                main.add_resource(buffer);
            }
        }

        let swept = ctx.sweep_deletions();
        if swept.destroyed > 0 || swept.requeued > 0 {
            debug!(
                "Deletion sweep: {} destroyed, {} requeued",
                swept.destroyed, swept.requeued
            );
        }

        let (buffers, chunks) = main.finish_for_submit()?;
        let fences = main.take_fences();

        let submit = match submits.submit(&buffers, chunks, wait_semaphores, present) {
            Ok(submit) => submit,
            Err(err) => {
                main.clear_used_resources();
                for (buffer, staging) in staged {
                    buffer.restore_upload(staging);
                    ctx.queue_upload(buffer);
                }
                if let Some(chunks) = submits.take_chunks() {
                    main.install_chunks(chunks);
                }
                return Err(err);
            }
        };

        main.submitted(submit);
        for (buffer, staging) in staged {
            let staging = Arc::new(BufferResource::new(staging, buffer.size()));
            staging.usage.mark_last_used(submit);
            ctx.queue_for_deletion(DeferredResource::Buffer(staging));
        }
        for fence in fences {
            if let Err(err) = GfxFence::signal(&fence, device, submit) {
                warn!("Failed to signal fence for submit {submit}: {err}");
            }
        }

        let chunks = submits.advance()?;
        main.install_chunks(chunks);
        Ok(submit)
    }

    pub fn wait_for_submit(&self, submit: u64, timeout: Duration) -> Result<SubmitWait> {
        self.ctx.submits().wait_for_submit(submit, timeout)
    }

    /// Waits for every flushed submit, then sweeps the deletion queue.
    pub fn wait_until_idle(&self) -> Result<()> {
        match self.ctx.submits().wait_all(self.config().wait_timeout)? {
            SubmitWait::Timeout => return Err(AshError::Timeout),
            SubmitWait::AlreadyFinished | SubmitWait::NotQueued | SubmitWait::Success => {}
        }
        // Two sweeps age resources through both delete lists.
        self.ctx.sweep_deletions();
        self.ctx.sweep_deletions();
        Ok(())
    }

    /// Sets the sample count used by attachments that follow the default.
    /// Returns the clamped value. Render passes pick it up on their next use.
    pub fn set_default_samples(&self, samples: u32) -> u32 {
        let applied = self.ctx.set_default_samples(samples);
        debug!("Default sample count set to {applied}");
        applied
    }

    pub fn default_samples(&self) -> u32 {
        self.ctx.default_samples()
    }

    pub fn set_default_anisotropy(&self, anisotropy: f32) -> f32 {
        let applied = self.ctx.set_default_anisotropy(anisotropy);
        debug!("Default anisotropy set to {applied}");
        applied
    }

    pub fn default_anisotropy(&self) -> f32 {
        self.ctx.default_anisotropy()
    }

    pub fn create_buffer(&self, desc: BufferDesc, data: Option<&[u8]>) -> Result<GfxBuffer> {
        GfxBuffer::new(&self.ctx, desc, data)
    }

    pub fn create_texture(&self, info: TextureInfo) -> Result<Texture> {
        Texture::new(&self.ctx, info)
    }

    pub fn create_render_pass(
        &self,
        name: impl Into<String>,
        attachments: Vec<AttachmentDesc>,
        subpasses: Vec<SubpassDesc>,
        dependencies: Vec<SubpassDependency>,
    ) -> Result<RenderPass> {
        RenderPass::new(&self.ctx, name, attachments, subpasses, dependencies)
    }

    pub fn create_framebuffer(
        &self,
        name: impl Into<String>,
        surfaces: Vec<Arc<dyn SurfaceSource>>,
        width: u32,
        height: u32,
    ) -> Result<Arc<Framebuffer>> {
        Framebuffer::new(&self.ctx, name, surfaces, width, height, 1)
    }

    pub fn create_shader(&self, desc: ShaderDesc) -> Result<Arc<Shader>> {
        Shader::new(&self.ctx, desc)
    }

    pub fn create_command_buffer_pool(
        &self,
        usage: CommandBufferUsage,
    ) -> Result<CommandBufferPool> {
        CommandBufferPool::new(&self.ctx, usage)
    }

    pub fn create_fence(&self) -> Result<GfxFence> {
        GfxFence::new(&self.ctx)
    }

    pub fn create_query_pool(&self, kind: QueryKind, count: u32) -> Result<QueryPool> {
        QueryPool::new(&self.ctx, kind, count)
    }

    pub fn create_descriptor_set(&self, desc: &DescriptorSetDesc) -> Result<DescriptorSet> {
        DescriptorSet::new(&self.ctx, desc)
    }

    /// Worker pool for parallel scene recording, sized from the config.
    pub fn create_thread_manager(&self) -> Result<SceneThreadManager> {
        SceneThreadManager::new(&self.ctx)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.main.get_mut().clear_used_resources();
        self.ctx.shutdown();
        info!("Renderer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::config::MsaaPreset;
    use crate::vulkan::{BufferUsage, FenceCompletion, MemoryHint, ObjectKind};

    fn renderer() -> (Renderer, Arc<HeadlessDevice>) {
        let _ = env_logger::builder().is_test(true).try_init();
        Renderer::headless(RendererConfig::default().with_abort_on_device_loss(false))
            .expect("headless renderer")
    }

    #[test]
    fn flush_hands_out_increasing_indices() {
        let (renderer, _device) = renderer();
        let first = renderer.flush().unwrap();
        let second = renderer.flush().unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(renderer.submit_count(), 3);
    }

    #[test]
    fn rejects_oversized_ring() {
        let device = Arc::new(HeadlessDevice::new());
        let result = Renderer::new(device, RendererConfig::default().with_submit_slots(9));
        assert!(matches!(result, Err(AshError::InvalidArgument(_))));
    }

    #[test]
    fn staged_upload_reaches_device_local_buffer() {
        let (renderer, device) = renderer();
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let buffer = renderer
            .create_buffer(
                BufferDesc {
                    size: 8,
                    usage: BufferUsage::VERTEX,
                    memory: MemoryHint::GpuOnly,
                },
                Some(&data),
            )
            .unwrap();
        assert!(buffer.resource().has_pending_upload());
        assert_eq!(device.live_count(ObjectKind::Buffer), 2);

        renderer.flush().unwrap();
        renderer.wait_until_idle().unwrap();
        renderer.flush().unwrap();
        renderer.flush().unwrap();

        assert!(!buffer.resource().has_pending_upload());
        assert_eq!(device.buffer_contents(buffer.handle()).unwrap(), data.to_vec());
        // The staging buffer went through deferred deletion.
        assert_eq!(device.live_count(ObjectKind::Buffer), 1);
    }

    #[test]
    fn user_fence_signals_after_flush() {
        let (renderer, device) = renderer();
        device.set_completion(FenceCompletion::Manual);
        let fence = renderer.create_fence().unwrap();

        renderer.main_command_buffer().set_fence(&fence).unwrap();
        let submit = renderer.flush().unwrap();
        assert_eq!(fence.submit_index(), Some(submit));
        assert_eq!(fence.wait(Duration::ZERO).unwrap(), SubmitWait::Timeout);

        device.complete_all();
        assert_eq!(fence.wait(Duration::from_secs(1)).unwrap(), SubmitWait::Success);
        fence.reset().unwrap();
        assert!(!fence.is_set());
    }

    #[test]
    fn default_samples_are_clamped() {
        let (renderer, _device) = renderer();
        let applied = renderer.set_default_samples(64);
        assert!(applied <= 8);
        assert_eq!(renderer.default_samples(), applied);

        let (msaa, _device) = Renderer::headless(
            RendererConfig::default()
                .with_msaa(MsaaPreset::X4)
                .with_abort_on_device_loss(false),
        )
        .unwrap();
        assert_eq!(msaa.default_samples(), 4);
    }

    #[test]
    fn shutdown_destroys_everything() {
        let (renderer, device) = renderer();
        let buffer = renderer
            .create_buffer(
                BufferDesc {
                    size: 16,
                    usage: BufferUsage::UNIFORM,
                    memory: MemoryHint::CpuToGpu,
                },
                None,
            )
            .unwrap();
        renderer.flush().unwrap();
        drop(buffer);
        drop(renderer);

        assert_eq!(device.live_count(ObjectKind::Buffer), 0);
        assert_eq!(device.live_count(ObjectKind::Fence), 0);
        assert_eq!(device.live_count(ObjectKind::CommandPool), 0);
        assert_eq!(device.in_flight_violations(), 0);
    }
}
