use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use bytemuck::{Pod, Zeroable};

use super::lifetime::Lifetime;
use super::render_pass::RenderPassData;
use super::resource::{GpuResource, ResourceUsage};
use crate::vulkan::{GpuDevice, PipelineBindPoint, PipelineHandle, PrimitiveType, VertexFormat};

/// Packed lookup key of a graphics pipeline.
///
/// Compared by bytes; the vertex formats behind `vertex_format_hash` are
/// compared separately because the hash may collide.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct PipelineKey {
    pub samples: u32,
    /// Bits of the anisotropy baked into the shader's default samplers, or
    /// of 1.0 when it has none.
    pub anisotropy: u32,
    pub primitive: u32,
    pub subpass: u32,
    pub vertex_format_hash: u64,
    /// Identity of the render pass data the pipeline was built against.
    pub render_pass: u64,
}

impl PipelineKey {
    pub fn new(
        samples: u32,
        anisotropy: f32,
        primitive: PrimitiveType,
        vertex_format_hash: u64,
        render_pass: &Lifetime<RenderPassData>,
        subpass: u32,
    ) -> Self {
        Self {
            samples,
            anisotropy: anisotropy.to_bits(),
            primitive: primitive_index(primitive),
            subpass,
            vertex_format_hash,
            render_pass: render_pass.id() as u64,
        }
    }

    pub fn anisotropy(&self) -> f32 {
        f32::from_bits(self.anisotropy)
    }

    pub fn hash_value(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        bytemuck::bytes_of(self).hash(&mut hasher);
        hasher.finish()
    }
}

fn primitive_index(primitive: PrimitiveType) -> u32 {
    match primitive {
        PrimitiveType::PointList => 0,
        PrimitiveType::LineList => 1,
        PrimitiveType::LineStrip => 2,
        PrimitiveType::TriangleList => 3,
        PrimitiveType::TriangleStrip => 4,
        PrimitiveType::TriangleFan => 5,
        PrimitiveType::PatchList => 6,
    }
}

/// Hashes a set of vertex buffer layouts for use in a [`PipelineKey`].
pub fn hash_vertex_formats(formats: &[VertexFormat]) -> u64 {
    let mut hasher = DefaultHasher::new();
    formats.hash(&mut hasher);
    hasher.finish()
}

/// Device pipeline owned by a shader.
pub struct Pipeline {
    pub(crate) usage: ResourceUsage,
    handle: PipelineHandle,
    bind_point: PipelineBindPoint,
    key: PipelineKey,
    hash: u64,
    vertex_formats: Vec<VertexFormat>,
    render_pass: Option<Lifetime<RenderPassData>>,
}

impl Pipeline {
    pub(crate) fn graphics(
        handle: PipelineHandle,
        key: PipelineKey,
        hash: u64,
        vertex_formats: Vec<VertexFormat>,
        render_pass: Lifetime<RenderPassData>,
    ) -> Self {
        Self {
            usage: ResourceUsage::new(),
            handle,
            bind_point: PipelineBindPoint::Graphics,
            key,
            hash,
            vertex_formats,
            render_pass: Some(render_pass),
        }
    }

    pub(crate) fn compute(handle: PipelineHandle) -> Self {
        Self {
            usage: ResourceUsage::new(),
            handle,
            bind_point: PipelineBindPoint::Compute,
            key: PipelineKey::zeroed(),
            hash: 0,
            vertex_formats: Vec::new(),
            render_pass: None,
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }

    pub fn bind_point(&self) -> PipelineBindPoint {
        self.bind_point
    }

    pub fn key(&self) -> &PipelineKey {
        &self.key
    }

    /// Full match: hash first, then key bytes, then the real vertex formats.
    pub(crate) fn matches(
        &self,
        hash: u64,
        key: &PipelineKey,
        vertex_formats: &[VertexFormat],
    ) -> bool {
        self.hash == hash
            && bytemuck::bytes_of(&self.key) == bytemuck::bytes_of(key)
            && self.vertex_formats == vertex_formats
    }

    pub(crate) fn built_for(&self, render_pass: &Lifetime<RenderPassData>) -> bool {
        self.render_pass
            .as_ref()
            .is_some_and(|lifetime| lifetime.ptr_eq(render_pass))
    }

    pub(crate) fn destroy(&self, device: &dyn GpuDevice) {
        device.destroy_pipeline(self.handle);
    }
}

impl GpuResource for Pipeline {
    fn usage(&self) -> &ResourceUsage {
        &self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::Format;

    #[test]
    fn key_has_no_padding() {
        assert_eq!(std::mem::size_of::<PipelineKey>(), 32);
    }

    #[test]
    fn vertex_format_hash_depends_on_layout() {
        let a = [VertexFormat::new(12).attribute(0, Format::R32G32B32Sfloat, 0)];
        let b = [VertexFormat::new(16).attribute(0, Format::R32G32B32Sfloat, 0)];
        assert_eq!(hash_vertex_formats(&a), hash_vertex_formats(&a));
        assert_ne!(hash_vertex_formats(&a), hash_vertex_formats(&b));
    }

    #[test]
    fn colliding_hashes_still_compare_formats() {
        let lifetime: Lifetime<RenderPassData> = Lifetime::new(std::sync::Weak::new());
        let formats = vec![VertexFormat::new(12)];
        let key = PipelineKey::new(1, 1.0, PrimitiveType::TriangleList, 7, &lifetime, 0);
        let pipeline = Pipeline::graphics(
            PipelineHandle(1),
            key,
            key.hash_value(),
            formats.clone(),
            lifetime.add_ref(),
        );

        assert!(pipeline.matches(key.hash_value(), &key, &formats));
        // Same hash, different layout: must not alias.
        assert!(!pipeline.matches(key.hash_value(), &key, &[VertexFormat::new(16)]));
        assert!(pipeline.built_for(&lifetime));
    }
}
