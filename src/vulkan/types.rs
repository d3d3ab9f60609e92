//! Plain-data descriptions passed across the device seam.

use std::ops::BitOr;

use glam::{Vec3, Vec4};

use super::handles::*;

/// Surface formats understood by the lifecycle core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Undefined,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    B8G8R8A8Unorm,
    B8G8R8A8Srgb,
    R16G16B16A16Sfloat,
    R32Sfloat,
    R32G32Sfloat,
    R32G32B32Sfloat,
    R32G32B32A32Sfloat,
    D16Unorm,
    D24UnormS8Uint,
    D32Sfloat,
}

impl Format {
    pub fn is_depth_stencil(self) -> bool {
        matches!(
            self,
            Format::D16Unorm | Format::D24UnormS8Uint | Format::D32Sfloat
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Format::D24UnormS8Uint)
    }
}

/// Sample count of an attachment. `Default` follows the renderer-wide
/// default sample count and is re-resolved whenever that changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Samples {
    Default,
    Explicit(u32),
}

impl Samples {
    pub fn resolve(self, default_samples: u32) -> u32 {
        match self {
            Samples::Default => default_samples,
            Samples::Explicit(count) => count,
        }
    }

    pub fn is_default(self) -> bool {
        matches!(self, Samples::Default)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Load,
    Clear,
    #[default]
    DontCare,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

/// Abstract attachment description.
#[derive(Clone, Debug, PartialEq)]
pub struct AttachmentDesc {
    pub format: Format,
    pub samples: Samples,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    /// Resolve the multisampled contents into a single-sample surface at
    /// the end of the render pass.
    pub resolve: bool,
}

impl AttachmentDesc {
    pub fn color(format: Format, samples: Samples) -> Self {
        Self {
            format,
            samples,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            resolve: false,
        }
    }

    pub fn depth(format: Format, samples: Samples) -> Self {
        Self {
            format,
            samples,
            load_op: LoadOp::Clear,
            store_op: StoreOp::DontCare,
            resolve: false,
        }
    }

    pub fn with_resolve(mut self) -> Self {
        self.resolve = true;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubpassDesc {
    pub name: String,
    pub input_attachments: Vec<u32>,
    pub color_attachments: Vec<u32>,
    pub depth_stencil_attachment: Option<u32>,
}

impl SubpassDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn color(mut self, attachment: u32) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    pub fn input(mut self, attachment: u32) -> Self {
        self.input_attachments.push(attachment);
        self
    }

    pub fn depth_stencil(mut self, attachment: u32) -> Self {
        self.depth_stencil_attachment = Some(attachment);
        self
    }
}

/// Dependency between subpasses. `None` stands for the work outside the
/// render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubpassDependency {
    pub src_subpass: Option<u32>,
    pub dst_subpass: Option<u32>,
    pub by_region: bool,
}

/// Attachment with every sentinel resolved, as handed to the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedAttachment {
    pub format: Format,
    pub samples: u32,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedSubpass {
    pub input_attachments: Vec<u32>,
    pub color_attachments: Vec<u32>,
    /// Parallel to `color_attachments`.
    pub resolve_attachments: Vec<Option<u32>>,
    pub depth_stencil_attachment: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderPassCreateDesc {
    pub attachments: Vec<ResolvedAttachment>,
    pub subpasses: Vec<ResolvedSubpass>,
    pub dependencies: Vec<SubpassDependency>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramebufferCreateDesc {
    pub render_pass: RenderPassHandle,
    pub attachments: Vec<ImageViewHandle>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color(Vec4),
    DepthStencil { depth: f32, stencil: u32 },
}

/// Viewport as an axis-aligned box. Depth range lives in `z`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub min: Vec3,
    pub max: Vec3,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            min: Vec3::ZERO,
            max: Vec3::new(width as f32, height as f32, 1.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderArea {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubpassContents {
    Inline,
    SecondaryCommandBuffers,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderPassBeginDesc {
    pub render_pass: RenderPassHandle,
    pub framebuffer: FramebufferHandle,
    pub area: RenderArea,
    pub clear_values: Vec<ClearValue>,
    pub contents: SubpassContents,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandBufferLevel {
    Primary,
    Secondary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InheritanceDesc {
    pub render_pass: RenderPassHandle,
    pub subpass: u32,
    pub framebuffer: FramebufferHandle,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandBufferBeginDesc {
    pub one_time_submit: bool,
    pub simultaneous_use: bool,
    pub inheritance: Option<InheritanceDesc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    TriangleFan,
    PatchList,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderStageModule {
    pub stage: ShaderStage,
    pub module: ShaderModuleHandle,
    pub entry_point: String,
}

impl ShaderStageModule {
    pub fn new(stage: ShaderStage, module: ShaderModuleHandle) -> Self {
        Self {
            stage,
            module,
            entry_point: "main".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

/// Fixed-function state snapshot supplied with a shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub cull_mode: CullMode,
    pub front_face_ccw: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub blend: bool,
    pub patch_control_points: u32,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            front_face_ccw: true,
            depth_test: true,
            depth_write: true,
            blend: false,
            patch_control_points: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: Format,
    pub offset: u32,
}

/// Layout of one vertex buffer binding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexFormat {
    pub attributes: Vec<VertexAttribute>,
    pub stride: u32,
    pub instanced: bool,
}

impl VertexFormat {
    pub fn new(stride: u32) -> Self {
        Self {
            attributes: Vec::new(),
            stride,
            instanced: false,
        }
    }

    pub fn attribute(mut self, location: u32, format: Format, offset: u32) -> Self {
        self.attributes.push(VertexAttribute {
            location,
            format,
            offset,
        });
        self
    }
}

/// Everything the device needs to build one graphics pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphicsPipelineDesc {
    pub stages: Vec<ShaderStageModule>,
    pub layout: PipelineLayoutHandle,
    pub render_state: RenderState,
    pub vertex_formats: Vec<VertexFormat>,
    pub primitive: PrimitiveType,
    pub samples: u32,
    pub render_pass: RenderPassHandle,
    pub subpass: u32,
    pub color_attachment_count: u32,
    pub allow_derivatives: bool,
    pub base_pipeline: PipelineHandle,
    pub cache: PipelineCacheHandle,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComputePipelineDesc {
    pub stage: ShaderStageModule,
    pub layout: PipelineLayoutHandle,
    pub cache: PipelineCacheHandle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
}

/// Buffer usage bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferUsage(pub u32);

impl BufferUsage {
    pub const VERTEX: Self = Self(1);
    pub const INDEX: Self = Self(1 << 1);
    pub const UNIFORM: Self = Self(1 << 2);
    pub const STORAGE: Self = Self(1 << 3);
    pub const INDIRECT: Self = Self(1 << 4);
    pub const TRANSFER_SRC: Self = Self(1 << 5);
    pub const TRANSFER_DST: Self = Self(1 << 6);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for BufferUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MemoryHint {
    #[default]
    GpuOnly,
    CpuToGpu,
    GpuToCpu,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: MemoryHint,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    pub sampled: bool,
    pub attachment: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Anisotropy {
    /// Follow the renderer-wide default anisotropy.
    Default,
    Explicit(f32),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub address_mode: AddressMode,
    pub anisotropy: Anisotropy,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            min_filter: Filter::Linear,
            mag_filter: Filter::Linear,
            address_mode: AddressMode::Repeat,
            anisotropy: Anisotropy::Default,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Timestamp,
    Occlusion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    StorageBuffer,
    CombinedImageSampler,
    StorageImage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorSetDesc {
    pub layout: DescriptorSetLayoutHandle,
    pub pool_sizes: Vec<(DescriptorKind, u32)>,
}

/// A descriptor set together with the pool it was carved out of.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorAllocation {
    pub pool: DescriptorPoolHandle,
    pub set: DescriptorSetHandle,
}

/// Image plus the default view over it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageAllocation {
    pub image: ImageHandle,
    pub view: ImageViewHandle,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubmitBatch<'a> {
    pub command_buffers: &'a [CommandBufferHandle],
    pub wait_semaphores: &'a [SemaphoreHandle],
    pub signal_semaphores: &'a [SemaphoreHandle],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    Timeout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawRange {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl DrawRange {
    pub fn vertices(count: u32) -> Self {
        Self {
            vertex_count: count,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexedDrawRange {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IndexType {
    U16,
    #[default]
    U32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_samples_follow_renderer() {
        assert_eq!(Samples::Default.resolve(4), 4);
        assert_eq!(Samples::Explicit(2).resolve(4), 2);
        assert!(Samples::Default.is_default());
    }

    #[test]
    fn buffer_usage_bits() {
        let usage = BufferUsage::VERTEX | BufferUsage::TRANSFER_DST;
        assert!(usage.contains(BufferUsage::VERTEX));
        assert!(!usage.contains(BufferUsage::INDEX));
    }
}
