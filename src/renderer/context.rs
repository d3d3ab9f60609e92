use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;

use super::config::RendererConfig;
use super::deletion::{DeferredResource, DeletionQueue, SweepStats};
use super::gpu_resources::BufferResource;
use super::pipeline_cache::PipelineCache;
use super::submit::SubmitQueue;
use crate::vulkan::{DeviceCapabilities, GpuDevice, PipelineCacheHandle};
use crate::Result;

/// Renderer state shared by every object created from a renderer.
///
/// Objects keep an `Arc` to the context so their teardown can reach the
/// deletion queue from whichever thread drops them.
pub struct RenderContext {
    device: Arc<dyn GpuDevice>,
    submits: SubmitQueue,
    deletion: DeletionQueue,
    uploads: Mutex<Vec<Arc<BufferResource>>>,
    frame_number: AtomicU64,
    default_samples: AtomicU32,
    default_anisotropy: AtomicU32,
    pipeline_cache: Option<PipelineCache>,
    config: RendererConfig,
    shut_down: AtomicBool,
}

impl RenderContext {
    pub(crate) fn new(device: Arc<dyn GpuDevice>, config: RendererConfig) -> Result<Arc<Self>> {
        let capabilities = device.capabilities();
        let default_samples = capabilities.clamp_samples(config.msaa.sample_count());
        let default_anisotropy = capabilities.clamp_anisotropy(config.default_anisotropy);

        let pipeline_cache = match PipelineCache::with_persistence(
            Arc::clone(&device),
            config.pipeline_cache_path.clone(),
        ) {
            Ok(cache) => Some(cache),
            Err(err) => {
                warn!("Continuing without a pipeline cache: {err}");
                None
            }
        };

        let submits = SubmitQueue::new(
            Arc::clone(&device),
            config.submit_slots,
            config.command_buffer_chunk_size.max(1),
            config.wait_timeout,
            config.abort_on_device_loss,
        )?;

        info!(
            "Render context created on {} ({} submit slots, {}x MSAA default)",
            capabilities.device_name, config.submit_slots, default_samples
        );

        Ok(Arc::new(Self {
            device,
            submits,
            deletion: DeletionQueue::new(),
            uploads: Mutex::new(Vec::new()),
            frame_number: AtomicU64::new(0),
            default_samples: AtomicU32::new(default_samples),
            default_anisotropy: AtomicU32::new(default_anisotropy.to_bits()),
            pipeline_cache,
            config,
            shut_down: AtomicBool::new(false),
        }))
    }

    pub fn device(&self) -> &dyn GpuDevice {
        self.device.as_ref()
    }

    pub fn device_arc(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        self.device.capabilities()
    }

    pub fn submits(&self) -> &SubmitQueue {
        &self.submits
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn finished_submit(&self) -> u64 {
        self.submits.finished_submit()
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number.load(Ordering::Acquire)
    }

    pub(crate) fn advance_frame(&self) -> u64 {
        self.frame_number.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Sample count substituted for `Samples::Default`.
    pub fn default_samples(&self) -> u32 {
        self.default_samples.load(Ordering::Acquire)
    }

    pub(crate) fn set_default_samples(&self, samples: u32) -> u32 {
        let samples = self.capabilities().clamp_samples(samples);
        self.default_samples.store(samples, Ordering::Release);
        samples
    }

    pub fn default_anisotropy(&self) -> f32 {
        f32::from_bits(self.default_anisotropy.load(Ordering::Acquire))
    }

    pub(crate) fn set_default_anisotropy(&self, anisotropy: f32) -> f32 {
        let anisotropy = self.capabilities().clamp_anisotropy(anisotropy);
        self.default_anisotropy
            .store(anisotropy.to_bits(), Ordering::Release);
        anisotropy
    }

    pub fn pipeline_cache(&self) -> PipelineCacheHandle {
        self.pipeline_cache
            .as_ref()
            .map(PipelineCache::handle)
            .unwrap_or(PipelineCacheHandle::NULL)
    }

    /// Hands a resource to the deletion queue. It is destroyed once no
    /// in-flight work can reference it.
    pub fn queue_for_deletion(&self, resource: DeferredResource) {
        if self.shut_down.load(Ordering::Acquire) {
            resource.destroy(self.device());
            return;
        }

        let finished = self.finished_submit();
        let Err(resource) = self.deletion.queue(resource, finished, self.device()) else {
            return;
        };

        warn!(
            "Deletion queue full; waiting synchronously for a {}",
            resource.kind()
        );
        match resource
            .usage()
            .wait_until_not_in_use(&self.submits, self.config.wait_timeout)
        {
            Ok(()) => resource.destroy(self.device()),
            Err(err) => {
                warn!("Could not wait for {}: {err}; retrying next sweep", resource.kind());
                self.deletion.push_blocking(resource);
            }
        }
    }

    pub(crate) fn sweep_deletions(&self) -> SweepStats {
        self.deletion.sweep(self.finished_submit(), self.device())
    }

    pub fn pending_deletions(&self) -> usize {
        self.deletion.pending()
    }

    pub(crate) fn queue_upload(&self, buffer: Arc<BufferResource>) {
        self.uploads.lock().push(buffer);
    }

    pub(crate) fn take_uploads(&self) -> Vec<Arc<BufferResource>> {
        std::mem::take(&mut *self.uploads.lock())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Waits for the device, destroys the submit ring and force-sweeps every
    /// delete list. Later deletions happen immediately.
    pub(crate) fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(err) = self.device.wait_idle() {
            warn!("wait_idle failed during shutdown: {err}");
        }
        self.submits.shutdown();
        self.uploads.lock().clear();
        let destroyed = self.deletion.force_sweep(self.device());
        info!("Render context shut down ({destroyed} deferred resources destroyed)");
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        self.shutdown();
        // Anything queued after shutdown was destroyed on the spot; this only
        // catches stragglers queued while shutdown was running.
        self.deletion.force_sweep(self.device.as_ref());
    }
}
