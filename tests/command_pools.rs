mod common;

use std::time::Duration;

use ash_lifecycle::prelude::*;
use ash_lifecycle::renderer::{RenderPassTarget, FRAME_DELAY};
use ash_lifecycle::vulkan::{FenceCompletion, ObjectKind};

use common::*;

fn record_marker(pool: &mut CommandBufferPool, label: &str) -> Result<()> {
    pool.create_command_buffers(1)?[0].insert_marker(label)
}

#[test]
fn pools_rotate_through_frame_delay_device_pools() {
    let (renderer, device) = renderer_with(
        RendererConfig::default()
            .with_submit_slots(8)
            .with_wait_timeout(Duration::from_millis(20)),
    );
    device.set_completion(FenceCompletion::Manual);
    let mut pool = renderer
        .create_command_buffer_pool(CommandBufferUsage::Standard)
        .unwrap();

    record_marker(&mut pool, "frame-0").unwrap();
    renderer
        .main_command_buffer()
        .submit(&mut pool.command_buffers()[0])
        .unwrap();
    renderer.flush().unwrap();

    // The other device pools were never submitted.
    for _ in 1..FRAME_DELAY {
        pool.reset().unwrap();
    }
    // Back at the first pool, whose work has not finished.
    assert!(matches!(pool.reset(), Err(AshError::Timeout)));

    device.complete_all();
    pool.reset().unwrap();
    assert!(pool.command_buffers().is_empty());
    assert_eq!(device.in_flight_violations(), 0);
}

#[test]
fn reset_reuses_command_buffers() {
    let (renderer, device) = renderer();
    let mut pool = renderer
        .create_command_buffer_pool(CommandBufferUsage::Standard)
        .unwrap();

    let mut frame = |index: usize| {
        pool.reset().unwrap();
        let buffers = pool.create_command_buffers(2).unwrap();
        buffers[0].insert_marker(&format!("a{index}")).unwrap();
        buffers[1].insert_marker(&format!("b{index}")).unwrap();
        {
            let mut main = renderer.main_command_buffer();
            for buffer in pool.command_buffers() {
                main.submit(buffer).unwrap();
            }
        }
        renderer.flush().unwrap();
    };

    for index in 0..FRAME_DELAY {
        frame(index);
    }
    let allocated = device.live_count(ObjectKind::CommandBuffer);
    for index in FRAME_DELAY..FRAME_DELAY * 4 {
        frame(index);
    }
    renderer.wait_until_idle().unwrap();

    // Every device pool and ring slot has been through one lap already.
    assert_eq!(device.live_count(ObjectKind::CommandBuffer), allocated);
    assert_eq!(device.executed_markers().len(), FRAME_DELAY * 4 * 2);
}

#[test]
fn standard_buffers_are_consumed_by_submit() {
    let (renderer, device) = renderer();
    let mut pool = renderer
        .create_command_buffer_pool(CommandBufferUsage::Standard)
        .unwrap();
    record_marker(&mut pool, "once").unwrap();
    {
        let mut main = renderer.main_command_buffer();
        let buffer = &mut pool.command_buffers()[0];
        main.submit(buffer).unwrap();
        main.submit(buffer).unwrap();
    }
    renderer.flush().unwrap();
    renderer.wait_until_idle().unwrap();
    assert_eq!(device.executed_markers(), vec!["once"]);
}

#[test]
fn multi_submit_buffers_keep_their_contents() {
    let (renderer, device) = renderer();
    let mut pool = renderer
        .create_command_buffer_pool(CommandBufferUsage::MultiSubmit)
        .unwrap();
    record_marker(&mut pool, "again").unwrap();
    {
        let mut main = renderer.main_command_buffer();
        let buffer = &mut pool.command_buffers()[0];
        main.submit(buffer).unwrap();
        main.insert_marker("between").unwrap();
        main.submit(buffer).unwrap();
    }
    renderer.flush().unwrap();
    renderer.wait_until_idle().unwrap();
    assert_eq!(device.executed_markers(), vec!["again", "between", "again"]);
}

#[test]
fn secondary_buffers_are_validated() {
    let (renderer, _device) = renderer();
    let pass = color_pass(&renderer, Samples::Explicit(1));
    let framebuffer = offscreen(&renderer, "target", 16, 16);

    let mut primaries = renderer
        .create_command_buffer_pool(CommandBufferUsage::Standard)
        .unwrap();
    let mut secondaries = renderer
        .create_command_buffer_pool(CommandBufferUsage::Secondary)
        .unwrap();

    let primary = &mut primaries.create_command_buffers(1).unwrap()[0];
    assert!(matches!(
        primary.begin_secondary(None),
        Err(AshError::InvalidState(_))
    ));

    let buffers = secondaries.create_command_buffers(2).unwrap();
    let (outer, inner) = buffers.split_at_mut(1);
    let outer = &mut outer[0];
    let inner = &mut inner[0];
    outer.begin_secondary(None).unwrap();
    assert!(matches!(
        outer.begin_secondary(None),
        Err(AshError::InvalidState(_))
    ));
    inner.begin_secondary(None).unwrap();
    inner.insert_marker("inner").unwrap();
    assert!(matches!(outer.submit(inner), Err(AshError::InvalidState(_))));

    // Inline subpasses reject secondary buffers.
    let mut main = renderer.main_command_buffer();
    main.begin_render_pass(&pass, &framebuffer, &[], SubpassContents::Inline)
        .unwrap();
    assert!(matches!(main.submit(outer), Err(AshError::InvalidState(_))));
    main.end_render_pass().unwrap();

    assert!(matches!(main.end(), Err(AshError::InvalidState(_))));
}

#[test]
fn secondary_buffers_replay_inside_their_subpass() {
    let (renderer, device) = renderer();
    let pass = color_pass(&renderer, Samples::Explicit(1));
    let framebuffer = offscreen(&renderer, "target", 16, 16);
    let shader = flat_shader(&renderer, "flat");
    let buffer = vertex_buffer(&renderer);
    let geometry = triangle(&buffer);
    let mut secondaries = renderer
        .create_command_buffer_pool(CommandBufferUsage::Secondary)
        .unwrap();

    let target = RenderPassTarget::new(&pass, &framebuffer).unwrap();
    let recorded = {
        let secondary = &mut secondaries.create_command_buffers(1).unwrap()[0];
        secondary
            .begin_secondary(Some(&target.inheritance(0)))
            .unwrap();
        secondary
            .draw(&shader, &geometry, DrawRange::vertices(3))
            .unwrap();
        secondary.insert_marker("inside").unwrap();
        secondary.end().unwrap();
        secondary.take_recorded()
    };

    {
        let mut main = renderer.main_command_buffer();
        main.insert_marker("before").unwrap();
        main.begin_target(&target, &[], SubpassContents::SecondaryCommandBuffers)
            .unwrap();
        main.execute(recorded).unwrap();
        main.end_render_pass().unwrap();
        main.insert_marker("after").unwrap();
    }
    renderer.flush().unwrap();
    renderer.wait_until_idle().unwrap();

    assert_eq!(device.executed_markers(), vec!["before", "inside", "after"]);
    assert_eq!(device.in_flight_violations(), 0);
}

#[test]
fn dropped_pools_outlive_their_submits() {
    let (renderer, device) = renderer_with(RendererConfig::default().with_submit_slots(6));
    device.set_completion(FenceCompletion::Manual);
    let baseline = device.live_count(ObjectKind::CommandPool);

    let mut pool = renderer
        .create_command_buffer_pool(CommandBufferUsage::Standard)
        .unwrap();
    assert_eq!(device.live_count(ObjectKind::CommandPool), baseline + FRAME_DELAY);
    record_marker(&mut pool, "pooled").unwrap();
    renderer
        .main_command_buffer()
        .submit(&mut pool.command_buffers()[0])
        .unwrap();
    renderer.flush().unwrap();
    drop(pool);

    renderer.flush().unwrap();
    renderer.flush().unwrap();
    // The submitted device pool waits for the GPU; the idle ones are gone.
    assert_eq!(device.live_count(ObjectKind::CommandPool), baseline + 1);

    device.complete_all();
    renderer.wait_until_idle().unwrap();
    assert_eq!(device.live_count(ObjectKind::CommandPool), baseline);
    assert_eq!(device.in_flight_violations(), 0);
}
