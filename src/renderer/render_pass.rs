//! Abstract render passes and the device objects derived from them.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use super::context::RenderContext;
use super::deletion::DeferredResource;
use super::framebuffer::{Framebuffer, RealFramebuffer};
use super::lifetime::Lifetime;
use super::resource::{GpuResource, ResourceUsage};
use super::shader::Shader;
use crate::vulkan::{
    AttachmentDesc, GpuDevice, LoadOp, RenderArea, RenderPassCreateDesc, RenderPassHandle,
    ResolvedAttachment, ResolvedSubpass, StoreOp, SubpassDependency, SubpassDesc,
};
use crate::{AshError, Result};

/// Device render pass built from a [`RenderPass`] description with every
/// default sample count resolved.
///
/// Shaders and framebuffers that built objects against this data register
/// themselves here so that retiring it can evict those objects.
pub struct RenderPassData {
    pub(crate) usage: ResourceUsage,
    lifetime: Lifetime<RenderPassData>,
    handle: RenderPassHandle,
    attachment_samples: Vec<u32>,
    /// Index of the resolve attachment per described attachment.
    resolve_slots: Vec<Option<u32>>,
    subpass_samples: Vec<u32>,
    subpass_color_counts: Vec<u32>,
    shaders: Mutex<Vec<Lifetime<Shader>>>,
    framebuffers: Mutex<Vec<Lifetime<Framebuffer>>>,
}

impl RenderPassData {
    fn build(
        device: &dyn GpuDevice,
        attachments: &[AttachmentDesc],
        subpasses: &[SubpassDesc],
        dependencies: &[SubpassDependency],
        default_samples: u32,
    ) -> Result<Arc<Self>> {
        let caps = device.capabilities();
        let attachment_samples: Vec<u32> = attachments
            .iter()
            .map(|attachment| caps.clamp_samples(attachment.samples.resolve(default_samples)))
            .collect();

        let mut resolved: Vec<ResolvedAttachment> = attachments
            .iter()
            .zip(&attachment_samples)
            .map(|(attachment, &samples)| ResolvedAttachment {
                format: attachment.format,
                samples,
                load_op: attachment.load_op,
                store_op: attachment.store_op,
            })
            .collect();

        let mut resolve_slots = vec![None; attachments.len()];
        for (index, attachment) in attachments.iter().enumerate() {
            if attachment.resolve
                && attachment_samples[index] > 1
                && !attachment.format.is_depth_stencil()
            {
                resolve_slots[index] = Some(resolved.len() as u32);
                resolved.push(ResolvedAttachment {
                    format: attachment.format,
                    samples: 1,
                    load_op: LoadOp::DontCare,
                    store_op: StoreOp::Store,
                });
            }
        }

        let resolved_subpasses: Vec<ResolvedSubpass> = subpasses
            .iter()
            .map(|subpass| ResolvedSubpass {
                input_attachments: subpass.input_attachments.clone(),
                color_attachments: subpass.color_attachments.clone(),
                resolve_attachments: subpass
                    .color_attachments
                    .iter()
                    .map(|&color| resolve_slots[color as usize])
                    .collect(),
                depth_stencil_attachment: subpass.depth_stencil_attachment,
            })
            .collect();

        let subpass_samples = subpasses
            .iter()
            .map(|subpass| {
                subpass
                    .color_attachments
                    .first()
                    .or(subpass.depth_stencil_attachment.as_ref())
                    .map(|&index| attachment_samples[index as usize])
                    .unwrap_or(default_samples)
            })
            .collect();
        let subpass_color_counts = subpasses
            .iter()
            .map(|subpass| subpass.color_attachments.len() as u32)
            .collect();

        let handle = device.create_render_pass(&RenderPassCreateDesc {
            attachments: resolved,
            subpasses: resolved_subpasses,
            dependencies: dependencies.to_vec(),
        })?;

        Ok(Arc::new_cyclic(|weak| Self {
            usage: ResourceUsage::new(),
            lifetime: Lifetime::new(weak.clone()),
            handle,
            attachment_samples,
            resolve_slots,
            subpass_samples,
            subpass_color_counts,
            shaders: Mutex::new(Vec::new()),
            framebuffers: Mutex::new(Vec::new()),
        }))
    }

    pub fn handle(&self) -> RenderPassHandle {
        self.handle
    }

    pub fn lifetime(&self) -> &Lifetime<RenderPassData> {
        &self.lifetime
    }

    pub fn attachment_count(&self) -> usize {
        self.attachment_samples.len()
    }

    pub fn attachment_samples(&self, attachment: usize) -> u32 {
        self.attachment_samples[attachment]
    }

    pub fn resolve_slot(&self, attachment: usize) -> Option<u32> {
        self.resolve_slots[attachment]
    }

    /// Number of attachments of the device render pass, resolves included.
    pub fn device_attachment_count(&self) -> usize {
        self.attachment_samples.len() + self.resolve_slots.iter().flatten().count()
    }

    pub fn subpass_count(&self) -> u32 {
        self.subpass_samples.len() as u32
    }

    /// Sample count pipelines use in `subpass`.
    pub fn subpass_samples(&self, subpass: u32) -> u32 {
        self.subpass_samples[subpass as usize]
    }

    pub fn subpass_color_count(&self, subpass: u32) -> u32 {
        self.subpass_color_counts[subpass as usize]
    }

    pub fn registered_shaders(&self) -> usize {
        self.shaders.lock().len()
    }

    pub fn registered_framebuffers(&self) -> usize {
        self.framebuffers.lock().len()
    }

    pub(crate) fn add_shader(&self, shader: Lifetime<Shader>) -> Result<()> {
        let mut shaders = self.shaders.lock();
        shaders
            .try_reserve(1)
            .map_err(|e| AshError::OutOfMemory(format!("shader registration: {e}")))?;
        shaders.push(shader);
        Ok(())
    }

    pub(crate) fn remove_shader(&self, shader: &Lifetime<Shader>) {
        self.shaders.lock().retain(|entry| !entry.ptr_eq(shader));
    }

    pub(crate) fn add_framebuffer(&self, framebuffer: Lifetime<Framebuffer>) -> Result<()> {
        let mut framebuffers = self.framebuffers.lock();
        framebuffers
            .try_reserve(1)
            .map_err(|e| AshError::OutOfMemory(format!("framebuffer registration: {e}")))?;
        framebuffers.push(framebuffer);
        Ok(())
    }

    pub(crate) fn remove_framebuffer(&self, framebuffer: &Lifetime<Framebuffer>) {
        self.framebuffers
            .lock()
            .retain(|entry| !entry.ptr_eq(framebuffer));
    }

    /// Expires the data, evicts everything built against it and queues it
    /// for deferred deletion.
    pub(crate) fn retire(self: &Arc<Self>, ctx: &RenderContext) {
        self.lifetime.destroy();

        // Snapshot under our own locks; the other side is called unlocked.
        let shaders = std::mem::take(&mut *self.shaders.lock());
        let framebuffers = std::mem::take(&mut *self.framebuffers.lock());

        for shader in shaders {
            if let Some(shader) = shader.acquire() {
                shader.remove_render_pass_data(&self.lifetime);
            }
        }
        for framebuffer in framebuffers {
            if let Some(framebuffer) = framebuffer.acquire() {
                framebuffer.remove_render_pass_data(&self.lifetime);
            }
        }

        ctx.queue_for_deletion(DeferredResource::RenderPassData(Arc::clone(self)));
    }

    pub(crate) fn destroy(&self, device: &dyn GpuDevice) {
        device.destroy_render_pass(self.handle);
    }
}

impl GpuResource for RenderPassData {
    fn usage(&self) -> &ResourceUsage {
        &self.usage
    }
}

struct RenderPassState {
    data: Arc<RenderPassData>,
    samples: u32,
    last_checked_frame: u64,
}

/// Abstract render pass: attachments, subpasses and dependencies.
///
/// The device object is derived lazily. When any attachment follows the
/// renderer's default sample count, the derived data is rebuilt after that
/// default changes, checked at most once per frame.
pub struct RenderPass {
    ctx: Arc<RenderContext>,
    name: String,
    attachments: Vec<AttachmentDesc>,
    subpasses: Vec<SubpassDesc>,
    dependencies: Vec<SubpassDependency>,
    uses_default_samples: bool,
    state: Mutex<RenderPassState>,
}

impl RenderPass {
    pub fn new(
        ctx: &Arc<RenderContext>,
        name: impl Into<String>,
        attachments: Vec<AttachmentDesc>,
        subpasses: Vec<SubpassDesc>,
        dependencies: Vec<SubpassDependency>,
    ) -> Result<Self> {
        let name = name.into();
        validate(ctx, &attachments, &subpasses, &dependencies)?;

        let uses_default_samples = attachments
            .iter()
            .any(|attachment| attachment.samples.is_default());
        let samples = ctx.default_samples();
        let data = RenderPassData::build(
            ctx.device(),
            &attachments,
            &subpasses,
            &dependencies,
            samples,
        )?;
        debug!(
            "Created render pass '{name}' ({} attachments, {} subpasses)",
            attachments.len(),
            subpasses.len()
        );

        Ok(Self {
            ctx: Arc::clone(ctx),
            name,
            attachments,
            subpasses,
            dependencies,
            uses_default_samples,
            state: Mutex::new(RenderPassState {
                data,
                samples,
                last_checked_frame: ctx.frame_number(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attachments(&self) -> &[AttachmentDesc] {
        &self.attachments
    }

    pub fn subpasses(&self) -> &[SubpassDesc] {
        &self.subpasses
    }

    pub fn subpass_count(&self) -> u32 {
        self.subpasses.len() as u32
    }

    pub fn uses_default_samples(&self) -> bool {
        self.uses_default_samples
    }

    /// Current derived data without checking the default sample count.
    pub fn current_data(&self) -> Arc<RenderPassData> {
        Arc::clone(&self.state.lock().data)
    }

    /// Derived data for the current frame, rebuilt first if the default
    /// sample count it depends on has changed.
    pub fn data(&self) -> Result<Arc<RenderPassData>> {
        let frame = self.ctx.frame_number();
        let mut state = self.state.lock();
        if !self.uses_default_samples || state.last_checked_frame == frame {
            return Ok(Arc::clone(&state.data));
        }

        let samples = self.ctx.default_samples();
        if state.samples == samples {
            state.last_checked_frame = frame;
            return Ok(Arc::clone(&state.data));
        }

        let data = RenderPassData::build(
            self.ctx.device(),
            &self.attachments,
            &self.subpasses,
            &self.dependencies,
            samples,
        )?;
        debug!(
            "Rebuilt render pass '{}' for {samples}x default samples (was {}x)",
            self.name, state.samples
        );
        let old = std::mem::replace(&mut state.data, Arc::clone(&data));
        state.samples = samples;
        state.last_checked_frame = frame;
        drop(state);

        old.retire(&self.ctx);
        Ok(data)
    }

    /// Render area covering a whole framebuffer.
    pub fn full_area(framebuffer: &Framebuffer) -> RenderArea {
        RenderArea {
            x: 0,
            y: 0,
            width: framebuffer.width(),
            height: framebuffer.height(),
        }
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        let data = Arc::clone(&self.state.lock().data);
        data.retire(&self.ctx);
    }
}

fn validate(
    ctx: &RenderContext,
    attachments: &[AttachmentDesc],
    subpasses: &[SubpassDesc],
    dependencies: &[SubpassDependency],
) -> Result<()> {
    if subpasses.is_empty() {
        return Err(AshError::InvalidArgument(
            "render pass needs at least one subpass".into(),
        ));
    }

    for attachment in attachments {
        if !ctx.capabilities().supports_format(attachment.format) {
            return Err(AshError::FormatNotSupported(attachment.format));
        }
    }

    let count = attachments.len() as u32;
    for subpass in subpasses {
        let referenced = subpass
            .input_attachments
            .iter()
            .chain(&subpass.color_attachments)
            .chain(subpass.depth_stencil_attachment.iter());
        for &index in referenced {
            if index >= count {
                return Err(AshError::InvalidArgument(format!(
                    "subpass '{}' references attachment {index} of {count}",
                    subpass.name
                )));
            }
        }
        for &color in &subpass.color_attachments {
            if attachments[color as usize].format.is_depth_stencil() {
                return Err(AshError::InvalidArgument(format!(
                    "subpass '{}' uses depth attachment {color} as a colour target",
                    subpass.name
                )));
            }
        }
        if let Some(depth) = subpass.depth_stencil_attachment {
            if !attachments[depth as usize].format.is_depth_stencil() {
                return Err(AshError::InvalidArgument(format!(
                    "subpass '{}' uses colour attachment {depth} as depth target",
                    subpass.name
                )));
            }
        }
    }

    let subpass_count = subpasses.len() as u32;
    for dependency in dependencies {
        let out_of_range = [dependency.src_subpass, dependency.dst_subpass]
            .into_iter()
            .flatten()
            .any(|subpass| subpass >= subpass_count);
        if out_of_range {
            return Err(AshError::InvalidArgument(format!(
                "dependency {dependency:?} references a missing subpass"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::config::{MsaaPreset, RendererConfig};
    use crate::vulkan::{Format, HeadlessDevice, Samples};

    fn context(msaa: MsaaPreset) -> (Arc<HeadlessDevice>, Arc<RenderContext>) {
        let device = Arc::new(HeadlessDevice::new());
        let ctx = RenderContext::new(
            Arc::clone(&device) as Arc<dyn GpuDevice>,
            RendererConfig::default()
                .with_msaa(msaa)
                .with_abort_on_device_loss(false),
        )
        .unwrap();
        (device, ctx)
    }

    #[test]
    fn resolve_attachments_follow_sample_count() {
        let (device, ctx) = context(MsaaPreset::X4);
        let render_pass = RenderPass::new(
            &ctx,
            "main",
            vec![
                AttachmentDesc::color(Format::B8G8R8A8Srgb, Samples::Default).with_resolve(),
                AttachmentDesc::depth(Format::D32Sfloat, Samples::Default),
            ],
            vec![SubpassDesc::new("opaque").color(0).depth_stencil(1)],
            Vec::new(),
        )
        .unwrap();

        let data = render_pass.current_data();
        assert_eq!(data.resolve_slot(0), Some(2));
        assert_eq!(data.device_attachment_count(), 3);
        assert_eq!(data.subpass_samples(0), 4);

        let desc = device.render_pass_desc(data.handle()).unwrap();
        assert_eq!(desc.subpasses[0].resolve_attachments, vec![Some(2)]);
        assert_eq!(desc.attachments[2].samples, 1);
    }

    #[test]
    fn single_sample_attachments_skip_resolve() {
        let (_device, ctx) = context(MsaaPreset::Off);
        let render_pass = RenderPass::new(
            &ctx,
            "main",
            vec![AttachmentDesc::color(Format::B8G8R8A8Srgb, Samples::Default).with_resolve()],
            vec![SubpassDesc::new("opaque").color(0)],
            Vec::new(),
        )
        .unwrap();
        assert_eq!(render_pass.current_data().resolve_slot(0), None);
    }

    #[test]
    fn invalid_descriptions_are_rejected() {
        let (device, ctx) = context(MsaaPreset::Off);
        let out_of_range = RenderPass::new(
            &ctx,
            "broken",
            vec![AttachmentDesc::color(Format::R8G8B8A8Unorm, Samples::Explicit(1))],
            vec![SubpassDesc::new("a").color(3)],
            Vec::new(),
        );
        assert!(matches!(out_of_range, Err(AshError::InvalidArgument(_))));

        let unsupported = RenderPass::new(
            &ctx,
            "broken",
            vec![AttachmentDesc::color(Format::Undefined, Samples::Explicit(1))],
            vec![SubpassDesc::new("a").color(0)],
            Vec::new(),
        );
        assert!(matches!(unsupported, Err(AshError::FormatNotSupported(_))));
        assert_eq!(device.live_count(crate::vulkan::ObjectKind::RenderPass), 0);
    }
}
