//! Opaque low-level object handles.
//!
//! Every object crossing the [`GpuDevice`](super::GpuDevice) seam is named by a
//! `u64` newtype. The ash backend stores raw Vulkan handles in them, the
//! headless backend hands out sequential ids.

macro_rules! define_handle {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);

            impl $name {
                pub const NULL: Self = Self(0);

                pub fn is_null(self) -> bool {
                    self.0 == 0
                }

                pub fn raw(self) -> u64 {
                    self.0
                }
            }
        )+
    };
}

define_handle!(
    CommandPoolHandle,
    CommandBufferHandle,
    FenceHandle,
    SemaphoreHandle,
    RenderPassHandle,
    FramebufferHandle,
    PipelineHandle,
    /// Pipeline layout supplied by the shader collaborator.
    PipelineLayoutHandle,
    /// Shader module supplied by the shader collaborator.
    ShaderModuleHandle,
    PipelineCacheHandle,
    BufferHandle,
    ImageHandle,
    ImageViewHandle,
    SamplerHandle,
    QueryPoolHandle,
    DescriptorPoolHandle,
    DescriptorSetHandle,
    DescriptorSetLayoutHandle,
);
