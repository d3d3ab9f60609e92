mod common;

use std::sync::Arc;
use std::thread;

use ash_lifecycle::prelude::*;
use ash_lifecycle::vulkan::{
    Anisotropy, ObjectKind, PipelineLayoutHandle, RecordedCommand, SamplerDesc,
    ShaderModuleHandle, ShaderStage, ShaderStageModule,
};

use common::*;

fn draw_once(
    renderer: &Renderer,
    pass: &RenderPass,
    framebuffer: &Framebuffer,
    shader: &Shader,
    geometry: &DrawGeometry,
) {
    let mut main = renderer.main_command_buffer();
    main.begin_render_pass(pass, framebuffer, &[], SubpassContents::Inline)
        .unwrap();
    main.draw(shader, geometry, DrawRange::vertices(3)).unwrap();
    main.end_render_pass().unwrap();
}

#[test]
fn repeated_draws_reuse_one_pipeline() {
    let (renderer, device) = renderer();
    let pass = color_pass(&renderer, Samples::Explicit(1));
    let framebuffer = offscreen(&renderer, "target", 64, 64);
    let shader = flat_shader(&renderer, "flat");
    let buffer = vertex_buffer(&renderer);
    let geometry = triangle(&buffer);

    for _ in 0..4 {
        renderer.begin_frame();
        draw_once(&renderer, &pass, &framebuffer, &shader, &geometry);
        renderer.end_frame().unwrap();
    }

    assert_eq!(shader.pipeline_count(), 1);
    assert_eq!(device.live_count(ObjectKind::Pipeline), 1);
    assert_eq!(framebuffer.real_framebuffer_count(), 1);
}

#[test]
fn new_vertex_layouts_derive_from_the_first_pipeline() {
    let (renderer, device) = renderer();
    let pass = color_pass(&renderer, Samples::Explicit(1));
    let shader = flat_shader(&renderer, "flat");
    let buffer = vertex_buffer(&renderer);
    let data = pass.data().unwrap();

    let positions = triangle(&buffer);
    let interleaved = DrawGeometry::new(
        &[(
            &buffer,
            VertexFormat::new(20)
                .attribute(0, Format::R32G32B32Sfloat, 0)
                .attribute(1, Format::R32G32Sfloat, 12),
        )],
        PrimitiveType::TriangleList,
    );

    let base = shader.get_pipeline(&positions, &data, 0).unwrap();
    let derived = shader.get_pipeline(&interleaved, &data, 0).unwrap();
    assert_ne!(base.handle(), derived.handle());
    assert_eq!(shader.pipeline_count(), 2);

    let desc = device.graphics_pipeline_desc(derived.handle()).unwrap();
    assert!(desc.allow_derivatives);
    assert_eq!(desc.base_pipeline, base.handle());
    assert_eq!(desc.vertex_formats.len(), 1);
    assert_eq!(desc.vertex_formats[0].stride, 20);

    // Same layout again is a cache hit.
    let again = shader.get_pipeline(&interleaved, &data, 0).unwrap();
    assert_eq!(again.handle(), derived.handle());
}

#[test]
fn primitive_type_is_part_of_the_key() {
    let (renderer, _device) = renderer();
    let pass = color_pass(&renderer, Samples::Explicit(1));
    let shader = flat_shader(&renderer, "flat");
    let buffer = vertex_buffer(&renderer);
    let data = pass.data().unwrap();

    let list = triangle(&buffer);
    let strip = DrawGeometry::new(&[(&buffer, position_format())], PrimitiveType::TriangleStrip);
    let a = shader.get_pipeline(&list, &data, 0).unwrap();
    let b = shader.get_pipeline(&strip, &data, 0).unwrap();
    assert_ne!(a.handle(), b.handle());
}

#[test]
fn default_anisotropy_only_rekeys_shaders_that_follow_it() {
    let (renderer, _device) = renderer();
    let pass = color_pass(&renderer, Samples::Explicit(1));
    let buffer = vertex_buffer(&renderer);
    let geometry = triangle(&buffer);
    let data = pass.data().unwrap();

    let stages = vec![
        ShaderStageModule::new(ShaderStage::Vertex, ShaderModuleHandle(1)),
        ShaderStageModule::new(ShaderStage::Fragment, ShaderModuleHandle(2)),
    ];
    let follows = renderer
        .create_shader(
            ShaderDesc::new("follows", stages.clone(), PipelineLayoutHandle(1))
                .with_samplers(vec![SamplerDesc::default()]),
        )
        .unwrap();
    let fixed = renderer
        .create_shader(
            ShaderDesc::new("fixed", stages, PipelineLayoutHandle(1)).with_samplers(vec![
                SamplerDesc {
                    anisotropy: Anisotropy::Explicit(4.0),
                    ..Default::default()
                },
            ]),
        )
        .unwrap();

    let follows_before = follows.get_pipeline(&geometry, &data, 0).unwrap();
    let fixed_before = fixed.get_pipeline(&geometry, &data, 0).unwrap();

    renderer.set_default_anisotropy(16.0);
    let follows_after = follows.get_pipeline(&geometry, &data, 0).unwrap();
    let fixed_after = fixed.get_pipeline(&geometry, &data, 0).unwrap();

    assert_ne!(follows_before.handle(), follows_after.handle());
    assert_eq!(fixed_before.handle(), fixed_after.handle());
    assert_eq!(follows_after.key().anisotropy(), 16.0);
}

#[test]
fn concurrent_lookups_build_a_single_pipeline() {
    let (renderer, device) = renderer();
    let pass = color_pass(&renderer, Samples::Explicit(1));
    let shader = flat_shader(&renderer, "flat");
    let buffer = vertex_buffer(&renderer);
    let geometry = triangle(&buffer);
    let data = pass.data().unwrap();

    let handles: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let shader = Arc::clone(&shader);
                let geometry = geometry.clone();
                let data = Arc::clone(&data);
                scope.spawn(move || shader.get_pipeline(&geometry, &data, 0).unwrap().handle())
            })
            .collect();
        workers.into_iter().map(|worker| worker.join().unwrap()).collect()
    });

    assert!(handles.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(shader.pipeline_count(), 1);
    assert_eq!(data.registered_shaders(), 1);

    // Losers of the race destroyed their duplicate right away.
    assert_eq!(device.live_count(ObjectKind::Pipeline), 1);
}

#[test]
fn compute_shaders_build_their_pipeline_up_front() {
    let (renderer, device) = renderer();
    let compute = compute_shader(&renderer, "cull");
    assert!(compute.is_compute());
    assert_eq!(device.live_count(ObjectKind::Pipeline), 1);

    let pipeline = compute.compute_pipeline().unwrap().handle();
    renderer
        .main_command_buffer()
        .dispatch(&compute, 8, 8, 1)
        .unwrap();
    renderer.flush().unwrap();
    renderer.wait_until_idle().unwrap();

    let commands = device.executed_commands();
    assert!(commands.contains(&RecordedCommand::BindPipeline(
        ash_lifecycle::vulkan::PipelineBindPoint::Compute,
        pipeline
    )));
    assert!(commands.contains(&RecordedCommand::Dispatch(8, 8, 1)));

    let pass = color_pass(&renderer, Samples::Explicit(1));
    let buffer = vertex_buffer(&renderer);
    let data = pass.data().unwrap();
    assert!(matches!(
        compute.get_pipeline(&triangle(&buffer), &data, 0),
        Err(AshError::InvalidArgument(_))
    ));
}

#[test]
fn cache_blob_is_persisted_between_renderers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipelines.bin");

    {
        let (renderer, _device) =
            renderer_with(RendererConfig::default().with_pipeline_cache(&path));
        let pass = color_pass(&renderer, Samples::Explicit(1));
        let shader = flat_shader(&renderer, "flat");
        let buffer = vertex_buffer(&renderer);
        let data = pass.data().unwrap();
        shader.get_pipeline(&triangle(&buffer), &data, 0).unwrap();
        let cache = renderer.context().pipeline_cache();
        assert!(!cache.is_null());
    }
    let saved = std::fs::read(&path).unwrap();
    assert!(saved.starts_with(b"HEADLESS"));

    let (renderer, device) = renderer_with(RendererConfig::default().with_pipeline_cache(&path));
    assert!(!renderer.context().pipeline_cache().is_null());
    assert_eq!(device.live_count(ObjectKind::PipelineCache), 1);
}
