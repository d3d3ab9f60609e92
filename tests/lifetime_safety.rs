mod common;

use std::sync::Arc;
use std::thread;

use ash_lifecycle::prelude::*;
use ash_lifecycle::renderer::{GpuResource, Lifetime};
use ash_lifecycle::vulkan::{FenceCompletion, ObjectKind};

use common::*;

#[test]
fn buffer_outlives_its_last_in_flight_submit() {
    let (renderer, device) = renderer_with(RendererConfig::default().with_submit_slots(8));
    device.set_completion(FenceCompletion::Manual);

    let pass = color_pass(&renderer, Samples::Explicit(1));
    let framebuffer = offscreen(&renderer, "target", 64, 64);
    let shader = flat_shader(&renderer, "flat");
    let buffer = vertex_buffer(&renderer);
    let handle = buffer.handle();

    {
        let geometry = triangle(&buffer);
        let mut main = renderer.main_command_buffer();
        main.begin_render_pass(&pass, &framebuffer, &[], SubpassContents::Inline)
            .unwrap();
        main.draw(&shader, &geometry, DrawRange::vertices(3)).unwrap();
        main.end_render_pass().unwrap();
    }
    let submit = renderer.flush().unwrap();
    drop(buffer);

    // Several sweeps while the GPU still holds the draw.
    renderer.flush().unwrap();
    renderer.flush().unwrap();
    renderer.flush().unwrap();
    assert!(device.is_alive(ObjectKind::Buffer, handle.raw()));
    assert!(renderer.pending_deletions() >= 1);

    device.complete_all();
    assert!(renderer
        .wait_for_submit(submit, std::time::Duration::from_secs(1))
        .unwrap()
        .is_finished());
    renderer.wait_until_idle().unwrap();

    assert!(!device.is_alive(ObjectKind::Buffer, handle.raw()));
    assert_eq!(device.in_flight_violations(), 0);
}

#[test]
fn recorded_but_unflushed_resources_stay_alive() {
    let (renderer, device) = renderer();
    let pass = color_pass(&renderer, Samples::Explicit(1));
    let framebuffer = offscreen(&renderer, "target", 32, 32);
    let shader = flat_shader(&renderer, "flat");
    let buffer = vertex_buffer(&renderer);
    let handle = buffer.handle();
    let geometry = triangle(&buffer);

    let mut main = renderer.main_command_buffer();
    main.begin_render_pass(&pass, &framebuffer, &[], SubpassContents::Inline)
        .unwrap();
    main.draw(&shader, &geometry, DrawRange::vertices(3)).unwrap();
    main.end_render_pass().unwrap();
    assert!(buffer.resource().usage().command_buffer_count() > 0);
    drop(main);

    drop(geometry);
    drop(buffer);
    // The buffer is referenced by the unflushed main command buffer, so
    // sweeps triggered by this flush must not destroy it before submission.
    renderer.flush().unwrap();
    assert_eq!(device.in_flight_violations(), 0);

    renderer.wait_until_idle().unwrap();
    assert!(!device.is_alive(ObjectKind::Buffer, handle.raw()));
}

#[test]
fn dropping_the_render_pass_first_evicts_pipelines() {
    let (renderer, device) = renderer();
    let pass = color_pass(&renderer, Samples::Explicit(1));
    let framebuffer = offscreen(&renderer, "target", 16, 16);
    let shader = flat_shader(&renderer, "flat");
    let buffer = vertex_buffer(&renderer);
    let geometry = triangle(&buffer);

    {
        let mut main = renderer.main_command_buffer();
        main.begin_render_pass(&pass, &framebuffer, &[], SubpassContents::Inline)
            .unwrap();
        main.draw(&shader, &geometry, DrawRange::vertices(3)).unwrap();
        main.end_render_pass().unwrap();
    }
    renderer.flush().unwrap();
    assert_eq!(shader.pipeline_count(), 1);
    assert_eq!(framebuffer.real_framebuffer_count(), 1);

    drop(pass);
    assert_eq!(shader.pipeline_count(), 0);
    assert_eq!(shader.registered_render_passes(), 0);
    assert_eq!(framebuffer.real_framebuffer_count(), 0);

    renderer.wait_until_idle().unwrap();
    assert_eq!(device.live_count(ObjectKind::Pipeline), 0);
    assert_eq!(device.live_count(ObjectKind::RenderPass), 0);
    assert_eq!(device.live_count(ObjectKind::Framebuffer), 0);
    assert_eq!(device.in_flight_violations(), 0);
}

#[test]
fn dropping_the_shader_first_unregisters_it() {
    let (renderer, device) = renderer();
    let pass = color_pass(&renderer, Samples::Explicit(1));
    let framebuffer = offscreen(&renderer, "target", 16, 16);
    let shader = flat_shader(&renderer, "flat");
    let buffer = vertex_buffer(&renderer);
    let geometry = triangle(&buffer);

    {
        let mut main = renderer.main_command_buffer();
        main.begin_render_pass(&pass, &framebuffer, &[], SubpassContents::Inline)
            .unwrap();
        main.draw(&shader, &geometry, DrawRange::vertices(3)).unwrap();
        main.end_render_pass().unwrap();
    }
    renderer.flush().unwrap();
    assert_eq!(pass.current_data().registered_shaders(), 1);

    drop(shader);
    assert_eq!(pass.current_data().registered_shaders(), 0);

    renderer.wait_until_idle().unwrap();
    assert_eq!(device.live_count(ObjectKind::Pipeline), 0);
    // The render pass itself is untouched.
    assert_eq!(device.live_count(ObjectKind::RenderPass), 1);
}

struct Owner {
    lifetime: Lifetime<Owner>,
    value: u32,
}

#[test]
fn lifetime_handles_race_with_owner_teardown() {
    let owner = Arc::new_cyclic(|weak| Owner {
        lifetime: Lifetime::new(weak.clone()),
        value: 7,
    });
    let handles: Vec<_> = (0..4).map(|_| owner.lifetime.add_ref()).collect();

    let readers: Vec<_> = handles
        .into_iter()
        .map(|handle| {
            thread::spawn(move || {
                let mut seen = 0u32;
                for _ in 0..1_000 {
                    match handle.acquire() {
                        Some(guard) => {
                            assert_eq!(guard.value, 7);
                            seen += 1;
                        }
                        None => break,
                    }
                }
                seen
            })
        })
        .collect();

    owner.lifetime.destroy();
    let probe = owner.lifetime.add_ref();
    drop(owner);

    for reader in readers {
        reader.join().unwrap();
    }
    assert!(probe.acquire().is_none());
    assert!(probe.is_expired());
}
