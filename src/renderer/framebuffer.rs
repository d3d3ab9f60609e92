//! Framebuffers and the concrete instances built per render pass data.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use super::context::RenderContext;
use super::deletion::DeferredResource;
use super::gpu_resources::Texture;
use super::lifetime::Lifetime;
use super::render_pass::RenderPassData;
use super::resource::{GpuResource, ResourceUsage};
use crate::vulkan::{FramebufferCreateDesc, FramebufferHandle, GpuDevice, ImageViewHandle};
use crate::{AshError, Result};

/// Something a framebuffer can render into: an offscreen texture or a
/// swap-chain image set.
pub trait SurfaceSource: Send + Sync {
    /// Identity of the image currently backing the surface. Swap chains
    /// change it every time a new image is acquired.
    fn image_index(&self) -> u32;

    /// View rendered into. Multisampled when the surface has a multisample
    /// buffer.
    fn render_view(&self) -> ImageViewHandle;

    /// Single-sample view to resolve into, when distinct from
    /// [`render_view`](Self::render_view).
    fn resolve_view(&self) -> Option<ImageViewHandle>;

    /// Resource to keep alive while command buffers render into the surface.
    fn tracked_resource(&self) -> Option<Arc<dyn GpuResource>> {
        None
    }
}

impl SurfaceSource for Texture {
    fn image_index(&self) -> u32 {
        0
    }

    fn render_view(&self) -> ImageViewHandle {
        self.resource()
            .multisample_view()
            .unwrap_or_else(|| self.resource().view())
    }

    fn resolve_view(&self) -> Option<ImageViewHandle> {
        self.resource()
            .multisample_view()
            .map(|_| self.resource().view())
    }

    fn tracked_resource(&self) -> Option<Arc<dyn GpuResource>> {
        Some(Arc::clone(self.resource()) as Arc<dyn GpuResource>)
    }
}

/// Device framebuffer for one render pass data and one set of surface
/// images.
pub struct RealFramebuffer {
    pub(crate) usage: ResourceUsage,
    handle: FramebufferHandle,
    render_pass: Lifetime<RenderPassData>,
    image_indices: Vec<u32>,
}

impl RealFramebuffer {
    pub fn handle(&self) -> FramebufferHandle {
        self.handle
    }

    pub fn image_indices(&self) -> &[u32] {
        &self.image_indices
    }

    pub(crate) fn destroy(&self, device: &dyn GpuDevice) {
        device.destroy_framebuffer(self.handle);
    }
}

impl GpuResource for RealFramebuffer {
    fn usage(&self) -> &ResourceUsage {
        &self.usage
    }
}

/// Abstract framebuffer: a list of surfaces and an extent.
pub struct Framebuffer {
    ctx: Arc<RenderContext>,
    lifetime: Lifetime<Framebuffer>,
    name: String,
    surfaces: Vec<Arc<dyn SurfaceSource>>,
    width: u32,
    height: u32,
    layers: u32,
    real: Mutex<Vec<Arc<RealFramebuffer>>>,
}

impl Framebuffer {
    pub fn new(
        ctx: &Arc<RenderContext>,
        name: impl Into<String>,
        surfaces: Vec<Arc<dyn SurfaceSource>>,
        width: u32,
        height: u32,
        layers: u32,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        if surfaces.is_empty() {
            return Err(AshError::InvalidArgument(format!(
                "framebuffer '{name}' has no surfaces"
            )));
        }
        if width == 0 || height == 0 || layers == 0 {
            return Err(AshError::InvalidArgument(format!(
                "framebuffer '{name}' has an empty extent"
            )));
        }

        Ok(Arc::new_cyclic(|weak| Self {
            ctx: Arc::clone(ctx),
            lifetime: Lifetime::new(weak.clone()),
            name,
            surfaces,
            width,
            height,
            layers,
            real: Mutex::new(Vec::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn surfaces(&self) -> &[Arc<dyn SurfaceSource>] {
        &self.surfaces
    }

    pub fn lifetime(&self) -> &Lifetime<Framebuffer> {
        &self.lifetime
    }

    /// Number of concrete framebuffers currently built.
    pub fn real_framebuffer_count(&self) -> usize {
        self.real.lock().len()
    }

    fn image_indices(&self) -> Vec<u32> {
        self.surfaces.iter().map(|surface| surface.image_index()).collect()
    }

    /// Concrete framebuffer for `data` and the surfaces' current images.
    ///
    /// An instance built for `data` with different images is replaced in
    /// place; the old one goes through deferred deletion.
    pub fn real_framebuffer(&self, data: &Arc<RenderPassData>) -> Result<Arc<RealFramebuffer>> {
        let image_indices = self.image_indices();
        let stale = {
            let real = self.real.lock();
            match real.iter().find(|entry| entry.render_pass.ptr_eq(data.lifetime())) {
                Some(entry) if entry.image_indices == image_indices => {
                    return Ok(Arc::clone(entry));
                }
                Some(_) => true,
                None => false,
            }
        };

        let created = Arc::new(self.build(data, image_indices)?);

        let (result, replaced, register) = {
            let mut real = self.real.lock();
            match real
                .iter()
                .position(|entry| entry.render_pass.ptr_eq(data.lifetime()))
            {
                Some(index) if real[index].image_indices == created.image_indices => {
                    // Another thread got there first.
                    (Arc::clone(&real[index]), Some(created), false)
                }
                Some(index) => {
                    let old = std::mem::replace(&mut real[index], Arc::clone(&created));
                    (created, Some(old), false)
                }
                None => match real.try_reserve(1) {
                    Ok(()) => {
                        real.push(Arc::clone(&created));
                        (created, None, true)
                    }
                    Err(e) => {
                        drop(real);
                        created.destroy(self.ctx.device());
                        return Err(AshError::OutOfMemory(format!("real framebuffer list: {e}")));
                    }
                },
            }
        };

        if let Some(replaced) = replaced {
            self.ctx
                .queue_for_deletion(DeferredResource::Framebuffer(replaced));
        }

        if register {
            if let Err(err) = data.add_framebuffer(self.lifetime.add_ref()) {
                self.remove_render_pass_data(data.lifetime());
                return Err(err);
            }
            // Retired while we were registering: its sweep missed us.
            if data.lifetime().is_expired() {
                self.remove_render_pass_data(data.lifetime());
            }
        }

        if stale {
            debug!("Rebuilt framebuffer '{}' for new surface images", self.name);
        }
        Ok(result)
    }

    fn build(&self, data: &RenderPassData, image_indices: Vec<u32>) -> Result<RealFramebuffer> {
        if data.attachment_count() != self.surfaces.len() {
            return Err(AshError::InvalidArgument(format!(
                "framebuffer '{}' has {} surfaces, render pass expects {}",
                self.name,
                self.surfaces.len(),
                data.attachment_count()
            )));
        }

        let mut attachments = Vec::with_capacity(data.device_attachment_count());
        for (index, surface) in self.surfaces.iter().enumerate() {
            let view = if data.resolve_slot(index).is_some() || data.attachment_samples(index) > 1 {
                surface.render_view()
            } else {
                surface.resolve_view().unwrap_or_else(|| surface.render_view())
            };
            attachments.push(view);
        }
        for (index, surface) in self.surfaces.iter().enumerate() {
            if data.resolve_slot(index).is_none() {
                continue;
            }
            let view = surface.resolve_view().ok_or_else(|| {
                AshError::InvalidArgument(format!(
                    "surface {index} of framebuffer '{}' has nothing to resolve into",
                    self.name
                ))
            })?;
            attachments.push(view);
        }

        let handle = self.ctx.device().create_framebuffer(&FramebufferCreateDesc {
            render_pass: data.handle(),
            attachments,
            width: self.width,
            height: self.height,
            layers: self.layers,
        })?;
        debug!("Built real framebuffer for '{}'", self.name);

        Ok(RealFramebuffer {
            usage: ResourceUsage::new(),
            handle,
            render_pass: data.lifetime().add_ref(),
            image_indices,
        })
    }

    /// Drops the concrete framebuffers built for `render_pass`.
    pub(crate) fn remove_render_pass_data(&self, render_pass: &Lifetime<RenderPassData>) {
        let removed: Vec<_> = {
            let mut real = self.real.lock();
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *real)
                .into_iter()
                .partition(|entry| entry.render_pass.ptr_eq(render_pass));
            *real = kept;
            removed
        };
        for framebuffer in removed {
            self.ctx
                .queue_for_deletion(DeferredResource::Framebuffer(framebuffer));
        }
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.lifetime.destroy();
        let real = std::mem::take(&mut *self.real.lock());
        for framebuffer in real {
            if let Some(data) = framebuffer.render_pass.acquire() {
                data.remove_framebuffer(&self.lifetime);
            }
            self.ctx
                .queue_for_deletion(DeferredResource::Framebuffer(framebuffer));
        }
    }
}
