//! Headless frame loop.
//!
//! Builds a small scene, records it on the scene threads for a number of
//! frames and switches the MSAA preset halfway through, so render pass
//! rebuilds, pipeline re-creation and deferred deletion all show up in the
//! log. Run with `RUST_LOG=debug` to see every step.

use std::sync::Arc;

use ash_lifecycle::prelude::*;
use ash_lifecycle::vulkan::{
    ObjectKind, PipelineLayoutHandle, ShaderModuleHandle, ShaderStage, ShaderStageModule,
};

const FRAMES: u64 = 12;

/// Draws the same triangle `count` times.
struct Triangles {
    name: String,
    shader: Arc<Shader>,
    geometry: DrawGeometry,
    count: u32,
}

impl ItemList for Triangles {
    fn name(&self) -> &str {
        &self.name
    }

    fn commit(&self, _view: &View, command_buffer: Option<&mut CommandBuffer>) -> Result<()> {
        let Some(command_buffer) = command_buffer else {
            return Ok(());
        };
        command_buffer.insert_marker(&self.name)?;
        for _ in 0..self.count {
            command_buffer.draw(&self.shader, &self.geometry, DrawRange::vertices(3))?;
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (renderer, device) =
        Renderer::headless(RendererConfig::default().with_msaa(MsaaPreset::Off))?;

    let pass = Arc::new(renderer.create_render_pass(
        "forward",
        vec![AttachmentDesc::color(Format::R8G8B8A8Unorm, Samples::Default).with_resolve()],
        vec![SubpassDesc::new("main").color(0)],
        Vec::new(),
    )?);
    let target = renderer.create_texture(TextureInfo {
        samples: Samples::Explicit(4),
        resolve: true,
        ..TextureInfo::offscreen(Format::R8G8B8A8Unorm, 1280, 720)
    })?;
    let framebuffer = renderer.create_framebuffer(
        "backbuffer",
        vec![Arc::new(target) as Arc<dyn SurfaceSource>],
        1280,
        720,
    )?;

    let shader = renderer.create_shader(ShaderDesc::new(
        "flat",
        vec![
            ShaderStageModule::new(ShaderStage::Vertex, ShaderModuleHandle(1)),
            ShaderStageModule::new(ShaderStage::Fragment, ShaderModuleHandle(2)),
        ],
        PipelineLayoutHandle(1),
    ))?;
    let vertices: [f32; 9] = [0.0, -0.5, 0.0, 0.5, 0.5, 0.0, -0.5, 0.5, 0.0];
    let buffer = renderer.create_buffer(
        BufferDesc {
            size: std::mem::size_of_val(&vertices) as u64,
            usage: BufferUsage::VERTEX,
            memory: MemoryHint::CpuToGpu,
        },
        Some(bytemuck::cast_slice(&vertices)),
    )?;
    let geometry = DrawGeometry::new(
        &[(&buffer, VertexFormat::new(12).attribute(0, Format::R32G32B32Sfloat, 0))],
        PrimitiveType::TriangleList,
    );

    let lists: Vec<Arc<dyn ItemList>> = (0..8)
        .map(|index| {
            Arc::new(Triangles {
                name: format!("batch-{index}"),
                shader: Arc::clone(&shader),
                geometry: geometry.clone(),
                count: 16,
            }) as Arc<dyn ItemList>
        })
        .collect();
    let scene = Scene::new(
        Vec::new(),
        vec![ScenePipelineItem::RenderPass(SceneRenderPass::new(
            Arc::clone(&pass),
            "backbuffer",
            vec![ClearValue::Color(glam::Vec4::new(0.1, 0.1, 0.1, 1.0))],
            vec![lists],
        )?)],
    )?;
    let view = View::new("main", 1280, 720).with_framebuffer("backbuffer", framebuffer);
    let threads = renderer.create_thread_manager()?;
    log::info!("Recording on {} scene threads", threads.thread_count());

    for frame in 0..FRAMES {
        if frame == FRAMES / 2 {
            let samples = renderer.set_default_samples(MsaaPreset::X4.sample_count());
            log::info!("Switching to {samples}x MSAA");
        }

        renderer.begin_frame();
        scene.update(frame as f64 / 60.0);
        scene.draw_main(&renderer, &view, Some(&threads))?;
        let submit = renderer.end_frame()?;
        log::info!(
            "Frame {frame}: submit {submit}, finished {}, {} pending deletions, {} pipelines",
            renderer.finished_submit(),
            renderer.pending_deletions(),
            device.live_count(ObjectKind::Pipeline),
        );
    }

    renderer.wait_until_idle()?;
    log::info!(
        "Idle: {} submits, {} render passes, {} framebuffers, {} in-flight violations",
        device.submit_count(),
        device.live_count(ObjectKind::RenderPass),
        device.live_count(ObjectKind::Framebuffer),
        device.in_flight_violations(),
    );
    Ok(())
}
