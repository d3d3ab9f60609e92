mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ash_lifecycle::prelude::*;
use ash_lifecycle::vulkan::{FenceCompletion, ObjectKind};

use common::*;

#[test]
fn waiters_wake_when_the_gpu_catches_up() {
    let (renderer, device) = renderer_with(RendererConfig::default().with_submit_slots(8));
    device.set_completion(FenceCompletion::Manual);

    let submits: Vec<u64> = (0..4).map(|_| renderer.flush().unwrap()).collect();

    thread::scope(|scope| {
        let waiters: Vec<_> = submits
            .iter()
            .map(|&submit| {
                let renderer = &renderer;
                scope.spawn(move || renderer.wait_for_submit(submit, Duration::from_secs(10)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        device.complete_all();

        for waiter in waiters {
            let result = waiter.join().unwrap().unwrap();
            assert!(result.is_finished(), "{result:?}");
        }
    });
    assert_eq!(renderer.finished_submit(), *submits.last().unwrap());
}

#[test]
fn slot_reuse_waits_out_concurrent_waiters() {
    let (renderer, device) = renderer();
    device.set_completion(FenceCompletion::Manual);
    let first = renderer.flush().unwrap();
    renderer.flush().unwrap();

    thread::scope(|scope| {
        let renderer = &renderer;
        let device = &device;
        let waiter = scope.spawn(move || renderer.wait_for_submit(first, Duration::from_secs(10)));
        scope.spawn(move || {
            thread::sleep(Duration::from_millis(30));
            device.complete_all();
        });

        // Reusing the first slot blocks on its fence until the GPU catches up.
        renderer.flush().unwrap();
        assert!(waiter.join().unwrap().unwrap().is_finished());
    });

    device.complete_all();
    renderer.wait_until_idle().unwrap();
    assert_eq!(device.in_flight_violations(), 0);
}

#[test]
fn drops_on_other_threads_race_with_flushes() {
    let (renderer, device) = renderer();

    thread::scope(|scope| {
        for _ in 0..4 {
            let renderer = &renderer;
            scope.spawn(move || {
                for _ in 0..200 {
                    let buffer = renderer
                        .create_buffer(
                            BufferDesc {
                                size: 64,
                                usage: BufferUsage::UNIFORM,
                                memory: MemoryHint::CpuToGpu,
                            },
                            None,
                        )
                        .unwrap();
                    drop(buffer);
                }
            });
        }

        for _ in 0..50 {
            renderer.main_command_buffer().insert_marker("frame").unwrap();
            renderer.flush().unwrap();
        }
    });

    renderer.wait_until_idle().unwrap();
    assert_eq!(device.live_count(ObjectKind::Buffer), 0);
    assert_eq!(renderer.pending_deletions(), 0);
    assert_eq!(device.invalid_destroys(), 0);
}

#[test]
fn pipeline_lookups_survive_render_pass_rebuilds() {
    let (renderer, device) = renderer();
    let pass = color_pass(&renderer, Samples::Default);
    let shader = flat_shader(&renderer, "flat");
    let buffer = vertex_buffer(&renderer);
    let geometry = triangle(&buffer);

    thread::scope(|scope| {
        for _ in 0..4 {
            let pass = Arc::clone(&pass);
            let shader = Arc::clone(&shader);
            let geometry = geometry.clone();
            scope.spawn(move || {
                for _ in 0..500 {
                    let data = pass.data().unwrap();
                    shader.get_pipeline(&geometry, &data, 0).unwrap();
                }
            });
        }

        for samples in [2, 4, 1, 8, 2, 1] {
            renderer.set_default_samples(samples);
            renderer.begin_frame();
            renderer.flush().unwrap();
            thread::sleep(Duration::from_millis(5));
        }
    });

    renderer.wait_until_idle().unwrap();
    assert_eq!(device.live_count(ObjectKind::RenderPass), 1);
    assert!(shader.registered_render_passes() <= 1);
    assert_eq!(device.invalid_destroys(), 0);
}

#[test]
fn owners_dropped_across_threads_unregister_cleanly() {
    let (renderer, device) = renderer();
    let buffer = vertex_buffer(&renderer);
    let geometry = triangle(&buffer);

    for _ in 0..16 {
        let pass = color_pass(&renderer, Samples::Explicit(1));
        let shader = flat_shader(&renderer, "flat");
        shader
            .get_pipeline(&geometry, &pass.data().unwrap(), 0)
            .unwrap();

        thread::scope(|scope| {
            scope.spawn(move || drop(pass));
            scope.spawn(move || drop(shader));
        });
    }

    renderer.wait_until_idle().unwrap();
    assert_eq!(device.live_count(ObjectKind::Pipeline), 0);
    assert_eq!(device.live_count(ObjectKind::RenderPass), 0);
    assert_eq!(device.invalid_destroys(), 0);
}
