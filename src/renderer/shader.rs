//! Shaders and the pipelines they own.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use super::context::RenderContext;
use super::deletion::DeferredResource;
use super::gpu_resources::{BufferResource, GfxBuffer};
use super::lifetime::Lifetime;
use super::pipeline::{hash_vertex_formats, Pipeline, PipelineKey};
use super::render_pass::RenderPassData;
use super::resource::{GpuResource, ResourceUsage};
use crate::vulkan::{
    Anisotropy, ComputePipelineDesc, GpuDevice, GraphicsPipelineDesc, IndexType,
    PipelineLayoutHandle, PrimitiveType, RenderState, SamplerDesc, SamplerHandle, ShaderStage,
    ShaderStageModule, VertexFormat,
};
use crate::{AshError, Result};

/// Everything the shader collaborator supplies: compiled stage modules,
/// the pipeline layout and a fixed-function state snapshot.
#[derive(Clone, Debug)]
pub struct ShaderDesc {
    pub name: String,
    pub stages: Vec<ShaderStageModule>,
    pub layout: PipelineLayoutHandle,
    pub render_state: RenderState,
    pub samplers: Vec<SamplerDesc>,
    pub push_constant_size: u32,
}

impl ShaderDesc {
    pub fn new(
        name: impl Into<String>,
        stages: Vec<ShaderStageModule>,
        layout: PipelineLayoutHandle,
    ) -> Self {
        Self {
            name: name.into(),
            stages,
            layout,
            render_state: RenderState::default(),
            samplers: Vec::new(),
            push_constant_size: 0,
        }
    }

    pub fn with_render_state(mut self, render_state: RenderState) -> Self {
        self.render_state = render_state;
        self
    }

    pub fn with_samplers(mut self, samplers: Vec<SamplerDesc>) -> Self {
        self.samplers = samplers;
        self
    }

    pub fn with_push_constants(mut self, size: u32) -> Self {
        self.push_constant_size = size;
        self
    }

    fn is_compute(&self) -> bool {
        self.stages.len() == 1 && self.stages[0].stage == ShaderStage::Compute
    }
}

/// Device samplers of one shader, built for one anisotropy value.
pub struct SamplerList {
    pub(crate) usage: ResourceUsage,
    samplers: Vec<SamplerHandle>,
    anisotropy: f32,
}

impl SamplerList {
    fn create(
        device: &dyn GpuDevice,
        descs: &[SamplerDesc],
        default_anisotropy: f32,
    ) -> Result<Self> {
        let caps = device.capabilities();
        let mut samplers = Vec::with_capacity(descs.len());
        for desc in descs {
            let anisotropy = match desc.anisotropy {
                Anisotropy::Default => default_anisotropy,
                Anisotropy::Explicit(value) => caps.clamp_anisotropy(value),
            };
            match device.create_sampler(desc, anisotropy) {
                Ok(sampler) => samplers.push(sampler),
                Err(err) => {
                    for sampler in samplers {
                        device.destroy_sampler(sampler);
                    }
                    return Err(err);
                }
            }
        }
        Ok(Self {
            usage: ResourceUsage::new(),
            samplers,
            anisotropy: default_anisotropy,
        })
    }

    pub fn samplers(&self) -> &[SamplerHandle] {
        &self.samplers
    }

    /// Default anisotropy the list was built with.
    pub fn anisotropy(&self) -> f32 {
        self.anisotropy
    }

    pub(crate) fn destroy(&self, device: &dyn GpuDevice) {
        for sampler in &self.samplers {
            device.destroy_sampler(*sampler);
        }
    }
}

impl GpuResource for SamplerList {
    fn usage(&self) -> &ResourceUsage {
        &self.usage
    }
}

/// Vertex and index buffers plus the layout pipelines are built for.
///
/// The geometry keeps the buffer records alive, but the buffers themselves
/// must outlive any draw that uses the geometry.
#[derive(Clone)]
pub struct DrawGeometry {
    vertex_buffers: Vec<Arc<BufferResource>>,
    vertex_formats: Vec<VertexFormat>,
    format_hash: u64,
    index_buffer: Option<(Arc<BufferResource>, IndexType)>,
    primitive: PrimitiveType,
}

impl DrawGeometry {
    pub fn new(vertex_buffers: &[(&GfxBuffer, VertexFormat)], primitive: PrimitiveType) -> Self {
        let vertex_formats: Vec<VertexFormat> =
            vertex_buffers.iter().map(|(_, format)| format.clone()).collect();
        Self {
            vertex_buffers: vertex_buffers
                .iter()
                .map(|(buffer, _)| Arc::clone(buffer.resource()))
                .collect(),
            format_hash: hash_vertex_formats(&vertex_formats),
            vertex_formats,
            index_buffer: None,
            primitive,
        }
    }

    pub fn with_index_buffer(mut self, buffer: &GfxBuffer, index_type: IndexType) -> Self {
        self.index_buffer = Some((Arc::clone(buffer.resource()), index_type));
        self
    }

    pub fn vertex_buffers(&self) -> &[Arc<BufferResource>] {
        &self.vertex_buffers
    }

    pub fn vertex_formats(&self) -> &[VertexFormat] {
        &self.vertex_formats
    }

    pub fn format_hash(&self) -> u64 {
        self.format_hash
    }

    pub fn index_buffer(&self) -> Option<&(Arc<BufferResource>, IndexType)> {
        self.index_buffer.as_ref()
    }

    pub fn primitive(&self) -> PrimitiveType {
        self.primitive
    }
}

#[derive(Default)]
struct ShaderPipelines {
    pipelines: Vec<Arc<Pipeline>>,
    render_passes: Vec<Lifetime<RenderPassData>>,
}

/// Shader program. Owns every pipeline built from it.
pub struct Shader {
    ctx: Arc<RenderContext>,
    lifetime: Lifetime<Shader>,
    desc: ShaderDesc,
    uses_default_anisotropy: bool,
    pipelines: Mutex<ShaderPipelines>,
    compute: Option<Arc<Pipeline>>,
    samplers: Mutex<Option<Arc<SamplerList>>>,
}

impl Shader {
    pub fn new(ctx: &Arc<RenderContext>, desc: ShaderDesc) -> Result<Arc<Self>> {
        let caps = ctx.capabilities();
        if desc.stages.is_empty() {
            return Err(AshError::InvalidArgument(format!(
                "shader '{}' has no stages",
                desc.name
            )));
        }
        if desc.push_constant_size > caps.max_push_constant_size {
            return Err(AshError::PushConstantsTooLarge {
                size: desc.push_constant_size,
                max: caps.max_push_constant_size,
            });
        }
        if !desc.is_compute() && desc.stages.iter().any(|s| s.stage == ShaderStage::Compute) {
            return Err(AshError::InvalidArgument(format!(
                "shader '{}' mixes compute and graphics stages",
                desc.name
            )));
        }

        let device = ctx.device();
        let samplers = if desc.samplers.is_empty() {
            None
        } else {
            Some(Arc::new(SamplerList::create(
                device,
                &desc.samplers,
                ctx.default_anisotropy(),
            )?))
        };

        let compute = if desc.is_compute() {
            let created = device.create_compute_pipeline(&ComputePipelineDesc {
                stage: desc.stages[0].clone(),
                layout: desc.layout,
                cache: ctx.pipeline_cache(),
            });
            match created {
                Ok(handle) => Some(Arc::new(Pipeline::compute(handle))),
                Err(err) => {
                    if let Some(samplers) = samplers {
                        samplers.destroy(device);
                    }
                    return Err(err);
                }
            }
        } else {
            None
        };

        let uses_default_anisotropy = desc
            .samplers
            .iter()
            .any(|sampler| sampler.anisotropy == Anisotropy::Default);
        debug!("Created shader '{}'", desc.name);

        Ok(Arc::new_cyclic(|weak| Self {
            ctx: Arc::clone(ctx),
            lifetime: Lifetime::new(weak.clone()),
            desc,
            uses_default_anisotropy,
            pipelines: Mutex::new(ShaderPipelines::default()),
            compute,
            samplers: Mutex::new(samplers),
        }))
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn desc(&self) -> &ShaderDesc {
        &self.desc
    }

    pub fn layout(&self) -> PipelineLayoutHandle {
        self.desc.layout
    }

    pub fn lifetime(&self) -> &Lifetime<Shader> {
        &self.lifetime
    }

    pub fn is_compute(&self) -> bool {
        self.compute.is_some()
    }

    pub fn compute_pipeline(&self) -> Option<&Arc<Pipeline>> {
        self.compute.as_ref()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.lock().pipelines.len()
    }

    pub fn registered_render_passes(&self) -> usize {
        self.pipelines.lock().render_passes.len()
    }

    /// Anisotropy that goes into pipeline keys.
    fn key_anisotropy(&self) -> f32 {
        if self.uses_default_anisotropy {
            self.ctx.default_anisotropy()
        } else {
            1.0
        }
    }

    /// Sampler list for the current default anisotropy, rebuilt if the
    /// default changed since it was built.
    pub fn samplers(&self) -> Result<Option<Arc<SamplerList>>> {
        let mut samplers = self.samplers.lock();
        let Some(current) = samplers.as_ref() else {
            return Ok(None);
        };
        let anisotropy = self.ctx.default_anisotropy();
        if !self.uses_default_anisotropy || current.anisotropy == anisotropy {
            return Ok(Some(Arc::clone(current)));
        }

        let rebuilt = Arc::new(SamplerList::create(
            self.ctx.device(),
            &self.desc.samplers,
            anisotropy,
        )?);
        let old = samplers.replace(Arc::clone(&rebuilt));
        drop(samplers);

        debug!("Rebuilt samplers of '{}' for {anisotropy}x anisotropy", self.desc.name);
        if let Some(old) = old {
            self.ctx.queue_for_deletion(DeferredResource::SamplerList(old));
        }
        Ok(Some(rebuilt))
    }

    /// Returns the pipeline for drawing `geometry` in `subpass` of `data`,
    /// building it on first use.
    pub fn get_pipeline(
        &self,
        geometry: &DrawGeometry,
        data: &Arc<RenderPassData>,
        subpass: u32,
    ) -> Result<Arc<Pipeline>> {
        if self.compute.is_some() {
            return Err(AshError::InvalidArgument(format!(
                "compute shader '{}' cannot draw",
                self.desc.name
            )));
        }
        if subpass >= data.subpass_count() {
            return Err(AshError::InvalidArgument(format!(
                "subpass {subpass} out of range for render pass with {}",
                data.subpass_count()
            )));
        }

        let key = PipelineKey::new(
            data.subpass_samples(subpass),
            self.key_anisotropy(),
            geometry.primitive(),
            geometry.format_hash(),
            data.lifetime(),
            subpass,
        );
        let hash = key.hash_value();

        let base = {
            let state = self.pipelines.lock();
            if let Some(found) = find(&state.pipelines, hash, &key, geometry.vertex_formats()) {
                return Ok(found);
            }
            state.pipelines.first().map(|pipeline| pipeline.handle())
        };

        let derivatives = self.ctx.capabilities().derivative_pipelines;
        let handle = self
            .ctx
            .device()
            .create_graphics_pipeline(&GraphicsPipelineDesc {
                stages: self.desc.stages.clone(),
                layout: self.desc.layout,
                render_state: self.desc.render_state,
                vertex_formats: geometry.vertex_formats().to_vec(),
                primitive: geometry.primitive(),
                samples: key.samples,
                render_pass: data.handle(),
                subpass,
                color_attachment_count: data.subpass_color_count(subpass),
                allow_derivatives: derivatives,
                base_pipeline: if derivatives {
                    base.unwrap_or_default()
                } else {
                    Default::default()
                },
                cache: self.ctx.pipeline_cache(),
            })
            .map_err(|err| {
                warn!("Failed to build pipeline for '{}': {err}", self.desc.name);
                err
            })?;
        let created = Arc::new(Pipeline::graphics(
            handle,
            key,
            hash,
            geometry.vertex_formats().to_vec(),
            data.lifetime().add_ref(),
        ));

        let register = {
            let mut state = self.pipelines.lock();
            if let Some(found) = find(&state.pipelines, hash, &key, geometry.vertex_formats()) {
                drop(state);
                created.destroy(self.ctx.device());
                return Ok(found);
            }
            if let Err(e) = state.pipelines.try_reserve(1) {
                drop(state);
                created.destroy(self.ctx.device());
                return Err(AshError::OutOfMemory(format!("pipeline list: {e}")));
            }
            state.pipelines.push(Arc::clone(&created));

            let known = state
                .render_passes
                .iter()
                .any(|render_pass| render_pass.ptr_eq(data.lifetime()));
            if !known {
                state.render_passes.push(data.lifetime().add_ref());
            }
            !known
        };
        debug!(
            "Built pipeline for '{}' (subpass {subpass}, {}x samples)",
            self.desc.name, key.samples
        );

        if register {
            if let Err(err) = data.add_shader(self.lifetime.add_ref()) {
                self.remove_render_pass_data(data.lifetime());
                return Err(err);
            }
            // Retired while we were registering: its sweep missed us.
            if data.lifetime().is_expired() {
                self.remove_render_pass_data(data.lifetime());
            }
        }
        Ok(created)
    }

    /// Evicts every pipeline built against `render_pass`.
    pub(crate) fn remove_render_pass_data(&self, render_pass: &Lifetime<RenderPassData>) {
        let removed: Vec<Arc<Pipeline>> = {
            let mut state = self.pipelines.lock();
            state
                .render_passes
                .retain(|entry| !entry.ptr_eq(render_pass));
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pipelines)
                .into_iter()
                .partition(|pipeline| pipeline.built_for(render_pass));
            state.pipelines = kept;
            removed
        };
        for pipeline in removed {
            self.ctx.queue_for_deletion(DeferredResource::Pipeline(pipeline));
        }
    }
}

fn find(
    pipelines: &[Arc<Pipeline>],
    hash: u64,
    key: &PipelineKey,
    vertex_formats: &[VertexFormat],
) -> Option<Arc<Pipeline>> {
    pipelines
        .iter()
        .find(|pipeline| pipeline.matches(hash, key, vertex_formats))
        .cloned()
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.lifetime.destroy();

        let ShaderPipelines {
            pipelines,
            render_passes,
        } = std::mem::take(&mut *self.pipelines.lock());
        for render_pass in render_passes {
            if let Some(data) = render_pass.acquire() {
                data.remove_shader(&self.lifetime);
            }
        }

        for pipeline in pipelines.into_iter().chain(self.compute.take()) {
            self.ctx.queue_for_deletion(DeferredResource::Pipeline(pipeline));
        }
        if let Some(samplers) = self.samplers.lock().take() {
            self.ctx.queue_for_deletion(DeferredResource::SamplerList(samplers));
        }
    }
}
