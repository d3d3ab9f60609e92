//! Resource lifetime, deferred deletion, derived-object caches and command
//! submission.

pub mod command_buffer;
pub mod command_pool;
pub mod config;
pub mod context;
pub mod deletion;
pub mod framebuffer;
pub mod gpu_resources;
pub mod lifetime;
pub mod pipeline;
pub mod pipeline_cache;
pub mod render_pass;
#[allow(clippy::module_inception)]
pub mod renderer;
pub mod resource;
pub mod shader;
pub mod submit;

pub use command_buffer::{
    CommandBuffer, CommandBufferUsage, RecordedCommands, RenderPassInheritance, RenderPassTarget,
};
pub use command_pool::{CommandBufferChunks, CommandBufferPool, CommandPoolResource};
pub use config::{
    MsaaPreset, RendererConfig, DEFAULT_SUBMIT_SLOTS, DEFAULT_WAIT_TIMEOUT, FRAME_DELAY,
};
pub use context::RenderContext;
pub use deletion::{DeferredResource, DeletionQueue, SweepStats, DELETE_LIST_COUNT};
pub use framebuffer::{Framebuffer, RealFramebuffer, SurfaceSource};
pub use gpu_resources::{
    BufferResource, DescriptorSet, GfxBuffer, GfxFence, QueryPool, Texture, TextureInfo,
    TextureResource,
};
pub use lifetime::{Lifetime, LifetimeGuard};
pub use pipeline::{Pipeline, PipelineKey};
pub use pipeline_cache::PipelineCache;
pub use render_pass::{RenderPass, RenderPassData};
pub use renderer::Renderer;
pub use resource::{GpuResource, ResourceUsage, NOT_SUBMITTED};
pub use shader::{DrawGeometry, SamplerList, Shader, ShaderDesc};
pub use submit::{SlotState, SubmitQueue, SubmitWait};
