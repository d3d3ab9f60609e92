//! GPU resource lifecycle and command submission core for ash-based
//! renderers.
//!
//! Objects that the GPU may still be reading are never freed directly. They
//! are tracked per submit, handed to a deferred deletion queue and destroyed
//! once the submit ring reports their last use as finished. Derived device
//! objects (render pass data, pipelines, concrete framebuffers) are built
//! lazily and link to each other through [`Lifetime`](renderer::Lifetime)
//! handles so either side can be torn down first.

pub mod error;
pub mod renderer;
pub mod scene;
pub mod vulkan;

pub use error::{AshError, Result};

/// Commonly used types.
pub mod prelude {
    pub use crate::renderer::{
        CommandBuffer, CommandBufferPool, CommandBufferUsage, DrawGeometry, Framebuffer,
        GfxBuffer, GfxFence, MsaaPreset, RenderPass, Renderer, RendererConfig, Shader,
        ShaderDesc, SubmitWait, SurfaceSource, Texture, TextureInfo,
    };
    pub use crate::scene::{
        ItemList, Scene, ScenePipelineItem, SceneRenderPass, SceneThreadManager, View,
    };
    pub use crate::vulkan::{
        AttachmentDesc, BufferDesc, BufferUsage, ClearValue, DrawRange, Format, GpuDevice,
        HeadlessDevice, MemoryHint, PrimitiveType, Samples, SubpassContents, SubpassDesc,
        VertexFormat,
    };
    pub use crate::{AshError, Result};
}
