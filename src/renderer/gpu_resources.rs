//! GPU resources owned by collaborators: buffers, textures, query pools,
//! descriptor sets and fences.
//!
//! Each user-facing type wraps an `Arc`'d resource record. Command buffers
//! keep the record alive while they reference it, and dropping the wrapper
//! hands the record to the deletion queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;

use super::context::RenderContext;
use super::deletion::DeferredResource;
use super::resource::{GpuResource, ResourceUsage, NOT_SUBMITTED};
use super::submit::SubmitWait;
use crate::vulkan::{
    BufferCopy, BufferDesc, BufferHandle, BufferUsage, CommandBufferHandle, DescriptorAllocation,
    DescriptorSetDesc, FenceHandle, FenceStatus, Format, GpuDevice, ImageAllocation,
    ImageViewHandle, MemoryHint, QueryKind, QueryPoolHandle, Samples, TextureDesc,
};
use crate::{AshError, Result};

pub struct BufferResource {
    pub(crate) usage: ResourceUsage,
    handle: BufferHandle,
    size: u64,
    /// Staging buffer whose contents still have to be copied into `handle`.
    staging: Mutex<Option<BufferHandle>>,
}

impl BufferResource {
    pub(crate) fn new(handle: BufferHandle, size: u64) -> Self {
        Self {
            usage: ResourceUsage::new(),
            handle,
            size,
            staging: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn has_pending_upload(&self) -> bool {
        self.staging.lock().is_some()
    }

    /// Records the pending staging copy, if any, and returns the staging
    /// buffer so the caller can retire it after submission.
    pub(crate) fn record_upload(
        &self,
        device: &dyn GpuDevice,
        command_buffer: CommandBufferHandle,
    ) -> Option<BufferHandle> {
        let staging = self.staging.lock().take()?;
        device.cmd_copy_buffer(
            command_buffer,
            staging,
            self.handle,
            &[BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: self.size,
            }],
        );
        Some(staging)
    }

    /// Puts back a staging buffer whose copy never reached the GPU.
    pub(crate) fn restore_upload(&self, staging: BufferHandle) {
        *self.staging.lock() = Some(staging);
    }

    pub(crate) fn destroy(&self, device: &dyn GpuDevice) {
        if let Some(staging) = self.staging.lock().take() {
            device.destroy_buffer(staging);
        }
        device.destroy_buffer(self.handle);
    }
}

impl GpuResource for BufferResource {
    fn usage(&self) -> &ResourceUsage {
        &self.usage
    }
}

/// GPU buffer.
pub struct GfxBuffer {
    ctx: Arc<RenderContext>,
    resource: Arc<BufferResource>,
    desc: BufferDesc,
}

impl GfxBuffer {
    /// Creates a buffer, optionally filled with `data`.
    ///
    /// Device-local buffers receive their data through a staging buffer that
    /// is copied at the next flush.
    pub fn new(ctx: &Arc<RenderContext>, desc: BufferDesc, data: Option<&[u8]>) -> Result<Self> {
        if desc.size == 0 {
            return Err(AshError::InvalidArgument("buffer size must be non-zero".into()));
        }
        if let Some(data) = data {
            if data.len() as u64 > desc.size {
                return Err(AshError::InvalidArgument(format!(
                    "{} bytes of initial data for a {} byte buffer",
                    data.len(),
                    desc.size
                )));
            }
        }

        let device = ctx.device();
        let mut device_desc = desc;
        if data.is_some() && desc.memory == MemoryHint::GpuOnly {
            device_desc.usage = desc.usage | BufferUsage::TRANSFER_DST;
        }
        let handle = device.create_buffer(&device_desc)?;
        let resource = Arc::new(BufferResource::new(handle, desc.size));

        if let Some(data) = data {
            if let Err(err) = Self::initialize(ctx, &resource, desc, data) {
                resource.destroy(device);
                return Err(err);
            }
        }

        Ok(Self {
            ctx: Arc::clone(ctx),
            resource,
            desc,
        })
    }

    fn initialize(
        ctx: &Arc<RenderContext>,
        resource: &Arc<BufferResource>,
        desc: BufferDesc,
        data: &[u8],
    ) -> Result<()> {
        let device = ctx.device();
        if desc.memory != MemoryHint::GpuOnly {
            return device.write_buffer(resource.handle, 0, data);
        }

        let staging = device.create_buffer(&BufferDesc {
            size: desc.size,
            usage: BufferUsage::TRANSFER_SRC,
            memory: MemoryHint::CpuToGpu,
        })?;
        *resource.staging.lock() = Some(staging);
        device.write_buffer(staging, 0, data)?;
        ctx.queue_upload(Arc::clone(resource));
        debug!("Queued {} byte upload for {:?}", data.len(), resource.handle);
        Ok(())
    }

    pub fn handle(&self) -> BufferHandle {
        self.resource.handle
    }

    pub fn size(&self) -> u64 {
        self.desc.size
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    pub fn resource(&self) -> &Arc<BufferResource> {
        &self.resource
    }

    /// Writes into a host-visible buffer.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if self.desc.memory == MemoryHint::GpuOnly {
            return Err(AshError::InvalidArgument(
                "cannot write to a device-local buffer from the host".into(),
            ));
        }
        if offset + data.len() as u64 > self.desc.size {
            return Err(AshError::InvalidArgument(format!(
                "write of {} bytes at {offset} overruns a {} byte buffer",
                data.len(),
                self.desc.size
            )));
        }
        self.ctx.device().write_buffer(self.resource.handle, offset, data)
    }
}

impl Drop for GfxBuffer {
    fn drop(&mut self) {
        self.ctx
            .queue_for_deletion(DeferredResource::Buffer(Arc::clone(&self.resource)));
    }
}

/// Creation parameters of a [`Texture`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureInfo {
    pub format: Format,
    pub width: u32,
    pub height: u32,
    /// Sample count rendered with. Anything above one together with
    /// `resolve` adds a multisampled surface that resolves into the texture.
    pub samples: Samples,
    pub resolve: bool,
    pub sampled: bool,
}

impl TextureInfo {
    pub fn offscreen(format: Format, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            samples: Samples::Explicit(1),
            resolve: false,
            sampled: true,
        }
    }
}

pub struct TextureResource {
    pub(crate) usage: ResourceUsage,
    allocation: ImageAllocation,
    multisample: Option<ImageAllocation>,
}

impl TextureResource {
    pub fn view(&self) -> ImageViewHandle {
        self.allocation.view
    }

    pub fn multisample_view(&self) -> Option<ImageViewHandle> {
        self.multisample.map(|allocation| allocation.view)
    }

    pub(crate) fn destroy(&self, device: &dyn GpuDevice) {
        if let Some(multisample) = self.multisample {
            device.destroy_texture(multisample);
        }
        device.destroy_texture(self.allocation);
    }
}

impl GpuResource for TextureResource {
    fn usage(&self) -> &ResourceUsage {
        &self.usage
    }
}

/// Offscreen render target or sampled image.
pub struct Texture {
    ctx: Arc<RenderContext>,
    resource: Arc<TextureResource>,
    info: TextureInfo,
    samples: u32,
}

impl Texture {
    pub fn new(ctx: &Arc<RenderContext>, info: TextureInfo) -> Result<Self> {
        if !ctx.capabilities().supports_format(info.format) {
            return Err(AshError::FormatNotSupported(info.format));
        }
        if info.width == 0 || info.height == 0 {
            return Err(AshError::InvalidArgument("texture extent must be non-zero".into()));
        }

        let samples = ctx
            .capabilities()
            .clamp_samples(info.samples.resolve(ctx.default_samples()));
        let multisampled = info.resolve && samples > 1;
        let device = ctx.device();

        let allocation = device.create_texture(&TextureDesc {
            format: info.format,
            width: info.width,
            height: info.height,
            samples: if multisampled { 1 } else { samples },
            sampled: info.sampled,
            attachment: true,
        })?;

        let multisample = if multisampled {
            match device.create_texture(&TextureDesc {
                format: info.format,
                width: info.width,
                height: info.height,
                samples,
                sampled: false,
                attachment: true,
            }) {
                Ok(allocation) => Some(allocation),
                Err(err) => {
                    device.destroy_texture(allocation);
                    return Err(err);
                }
            }
        } else {
            None
        };

        Ok(Self {
            ctx: Arc::clone(ctx),
            resource: Arc::new(TextureResource {
                usage: ResourceUsage::new(),
                allocation,
                multisample,
            }),
            info,
            samples,
        })
    }

    pub fn info(&self) -> &TextureInfo {
        &self.info
    }

    /// Sample count the texture was created with.
    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn resource(&self) -> &Arc<TextureResource> {
        &self.resource
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.ctx
            .queue_for_deletion(DeferredResource::Texture(Arc::clone(&self.resource)));
    }
}

pub struct QueryPoolResource {
    pub(crate) usage: ResourceUsage,
    handle: QueryPoolHandle,
}

impl QueryPoolResource {
    pub fn handle(&self) -> QueryPoolHandle {
        self.handle
    }

    pub(crate) fn destroy(&self, device: &dyn GpuDevice) {
        device.destroy_query_pool(self.handle);
    }
}

impl GpuResource for QueryPoolResource {
    fn usage(&self) -> &ResourceUsage {
        &self.usage
    }
}

pub struct QueryPool {
    ctx: Arc<RenderContext>,
    resource: Arc<QueryPoolResource>,
    kind: QueryKind,
    count: u32,
}

impl QueryPool {
    pub fn new(ctx: &Arc<RenderContext>, kind: QueryKind, count: u32) -> Result<Self> {
        if count == 0 {
            return Err(AshError::InvalidArgument("query pool needs at least one query".into()));
        }
        let handle = ctx.device().create_query_pool(kind, count)?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            resource: Arc::new(QueryPoolResource {
                usage: ResourceUsage::new(),
                handle,
            }),
            kind,
            count,
        })
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn resource(&self) -> &Arc<QueryPoolResource> {
        &self.resource
    }
}

impl Drop for QueryPool {
    fn drop(&mut self) {
        self.ctx
            .queue_for_deletion(DeferredResource::QueryPool(Arc::clone(&self.resource)));
    }
}

pub struct DescriptorSetResource {
    pub(crate) usage: ResourceUsage,
    allocation: DescriptorAllocation,
}

impl DescriptorSetResource {
    pub fn allocation(&self) -> DescriptorAllocation {
        self.allocation
    }

    pub(crate) fn destroy(&self, device: &dyn GpuDevice) {
        device.destroy_descriptor_set(self.allocation);
    }
}

impl GpuResource for DescriptorSetResource {
    fn usage(&self) -> &ResourceUsage {
        &self.usage
    }
}

pub struct DescriptorSet {
    ctx: Arc<RenderContext>,
    resource: Arc<DescriptorSetResource>,
}

impl DescriptorSet {
    pub fn new(ctx: &Arc<RenderContext>, desc: &DescriptorSetDesc) -> Result<Self> {
        let allocation = ctx.device().create_descriptor_set(desc)?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            resource: Arc::new(DescriptorSetResource {
                usage: ResourceUsage::new(),
                allocation,
            }),
        })
    }

    pub fn resource(&self) -> &Arc<DescriptorSetResource> {
        &self.resource
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        self.ctx
            .queue_for_deletion(DeferredResource::DescriptorSet(Arc::clone(&self.resource)));
    }
}

pub struct FenceResource {
    pub(crate) usage: ResourceUsage,
    handle: FenceHandle,
    submit: AtomicU64,
}

impl FenceResource {
    pub fn handle(&self) -> FenceHandle {
        self.handle
    }

    pub(crate) fn destroy(&self, device: &dyn GpuDevice) {
        device.destroy_fence(self.handle);
    }
}

impl GpuResource for FenceResource {
    fn usage(&self) -> &ResourceUsage {
        &self.usage
    }
}

/// Fence signaled once all work flushed before it has finished.
pub struct GfxFence {
    ctx: Arc<RenderContext>,
    resource: Arc<FenceResource>,
}

impl GfxFence {
    pub fn new(ctx: &Arc<RenderContext>) -> Result<Self> {
        let handle = ctx.device().create_fence(false)?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            resource: Arc::new(FenceResource {
                usage: ResourceUsage::new(),
                handle,
                submit: AtomicU64::new(NOT_SUBMITTED),
            }),
        })
    }

    pub fn resource(&self) -> &Arc<FenceResource> {
        &self.resource
    }

    /// Submit index the fence was signaled with, if it has been flushed.
    pub fn submit_index(&self) -> Option<u64> {
        match self.resource.submit.load(Ordering::Acquire) {
            NOT_SUBMITTED => None,
            index => Some(index),
        }
    }

    pub fn is_set(&self) -> bool {
        self.submit_index().is_some()
    }

    pub fn wait(&self, timeout: Duration) -> Result<SubmitWait> {
        if self.submit_index().is_none() {
            return Ok(SubmitWait::NotQueued);
        }
        let timeout_ns = timeout.as_nanos().min(u64::MAX as u128) as u64;
        match self
            .ctx
            .device()
            .wait_for_fences(&[self.resource.handle], timeout_ns)?
        {
            FenceStatus::Signaled => Ok(SubmitWait::Success),
            FenceStatus::Timeout => Ok(SubmitWait::Timeout),
        }
    }

    /// Makes the fence available for another `set`. Fails while its submit
    /// is still in flight.
    pub fn reset(&self) -> Result<()> {
        if self.submit_index().is_none() {
            return Ok(());
        }
        if self.resource.usage.is_in_use(self.ctx.finished_submit())
            && self.wait(Duration::ZERO)? != SubmitWait::Success
        {
            return Err(AshError::InvalidState(
                "fence reset while its submit is in flight".into(),
            ));
        }
        self.ctx.device().reset_fences(&[self.resource.handle])?;
        self.resource.submit.store(NOT_SUBMITTED, Ordering::Release);
        Ok(())
    }

    /// Signals the fence behind the work of `submit`.
    pub(crate) fn signal(
        resource: &FenceResource,
        device: &dyn GpuDevice,
        submit: u64,
    ) -> Result<()> {
        device.queue_submit(&Default::default(), resource.handle)?;
        resource.submit.store(submit, Ordering::Release);
        resource.usage.mark_last_used(submit);
        Ok(())
    }
}

impl Drop for GfxFence {
    fn drop(&mut self) {
        self.ctx
            .queue_for_deletion(DeferredResource::Fence(Arc::clone(&self.resource)));
    }
}
