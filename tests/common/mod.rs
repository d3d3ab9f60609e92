#![allow(dead_code)]

use std::sync::Arc;

use ash_lifecycle::prelude::*;
use ash_lifecycle::vulkan::{
    PipelineLayoutHandle, ShaderModuleHandle, ShaderStage, ShaderStageModule,
};
use parking_lot::Mutex;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn renderer() -> (Renderer, Arc<HeadlessDevice>) {
    renderer_with(RendererConfig::default())
}

pub fn renderer_with(config: RendererConfig) -> (Renderer, Arc<HeadlessDevice>) {
    init_logging();
    Renderer::headless(config.with_abort_on_device_loss(false)).expect("headless renderer")
}

/// Single-subpass render pass with one colour attachment.
pub fn color_pass(renderer: &Renderer, samples: Samples) -> Arc<RenderPass> {
    Arc::new(
        renderer
            .create_render_pass(
                "color",
                vec![AttachmentDesc::color(Format::R8G8B8A8Unorm, samples)],
                vec![SubpassDesc::new("main").color(0)],
                Vec::new(),
            )
            .expect("render pass"),
    )
}

/// Two subpasses drawing into the same colour attachment.
pub fn two_subpass_pass(renderer: &Renderer) -> Arc<RenderPass> {
    Arc::new(
        renderer
            .create_render_pass(
                "two-subpass",
                vec![AttachmentDesc::color(Format::R8G8B8A8Unorm, Samples::Explicit(1))],
                vec![
                    SubpassDesc::new("opaque").color(0),
                    SubpassDesc::new("overlay").color(0),
                ],
                Vec::new(),
            )
            .expect("render pass"),
    )
}

pub fn offscreen(renderer: &Renderer, name: &str, width: u32, height: u32) -> Arc<Framebuffer> {
    let texture = renderer
        .create_texture(TextureInfo::offscreen(Format::R8G8B8A8Unorm, width, height))
        .expect("texture");
    renderer
        .create_framebuffer(name, vec![Arc::new(texture) as Arc<dyn SurfaceSource>], width, height)
        .expect("framebuffer")
}

pub fn flat_shader(renderer: &Renderer, name: &str) -> Arc<Shader> {
    renderer
        .create_shader(ShaderDesc::new(
            name,
            vec![
                ShaderStageModule::new(ShaderStage::Vertex, ShaderModuleHandle(1)),
                ShaderStageModule::new(ShaderStage::Fragment, ShaderModuleHandle(2)),
            ],
            PipelineLayoutHandle(1),
        ))
        .expect("shader")
}

pub fn compute_shader(renderer: &Renderer, name: &str) -> Arc<Shader> {
    renderer
        .create_shader(ShaderDesc::new(
            name,
            vec![ShaderStageModule::new(ShaderStage::Compute, ShaderModuleHandle(3))],
            PipelineLayoutHandle(2),
        ))
        .expect("compute shader")
}

pub fn vertex_buffer(renderer: &Renderer) -> GfxBuffer {
    let vertices: [f32; 9] = [0.0, -0.5, 0.0, 0.5, 0.5, 0.0, -0.5, 0.5, 0.0];
    renderer
        .create_buffer(
            BufferDesc {
                size: std::mem::size_of_val(&vertices) as u64,
                usage: BufferUsage::VERTEX,
                memory: MemoryHint::CpuToGpu,
            },
            Some(bytemuck::cast_slice(&vertices)),
        )
        .expect("vertex buffer")
}

pub fn position_format() -> VertexFormat {
    VertexFormat::new(12).attribute(0, Format::R32G32B32Sfloat, 0)
}

pub fn triangle(buffer: &GfxBuffer) -> DrawGeometry {
    DrawGeometry::new(&[(buffer, position_format())], PrimitiveType::TriangleList)
}

/// Item list that only drops a debug marker, recording every commit.
pub struct MarkerList {
    name: String,
    pre_render_pass: bool,
    commits: Mutex<u32>,
}

impl MarkerList {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            pre_render_pass: false,
            commits: Mutex::new(0),
        })
    }

    pub fn with_pre_render_pass(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            pre_render_pass: true,
            commits: Mutex::new(0),
        })
    }

    pub fn commits(&self) -> u32 {
        *self.commits.lock()
    }
}

impl ItemList for MarkerList {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_pre_render_pass(&self) -> bool {
        self.pre_render_pass
    }

    fn pre_render_pass(&self, _view: &View, command_buffer: &mut CommandBuffer) -> Result<()> {
        command_buffer.insert_marker(&format!("{}:pre", self.name))
    }

    fn commit(&self, _view: &View, command_buffer: Option<&mut CommandBuffer>) -> Result<()> {
        *self.commits.lock() += 1;
        match command_buffer {
            Some(command_buffer) => command_buffer.insert_marker(&self.name),
            None => Ok(()),
        }
    }
}
