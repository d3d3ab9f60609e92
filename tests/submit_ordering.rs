mod common;

use std::time::Duration;

use ash_lifecycle::prelude::*;
use ash_lifecycle::renderer::SlotState;
use ash_lifecycle::vulkan::{FenceCompletion, RecordedCommand};

use common::*;

#[test]
fn finished_index_trails_the_ring() {
    let (renderer, _device) = renderer();
    assert_eq!(renderer.submit_count(), 1);
    assert_eq!(renderer.finished_submit(), 0);

    for k in 1..=6u64 {
        assert_eq!(renderer.flush().unwrap(), k);
        // Only reusing a slot observes its fence.
        let expected = k.saturating_sub(2);
        assert_eq!(renderer.finished_submit(), expected, "after flush {k}");
    }
}

#[test]
fn wait_for_submit_classifies_indices() {
    let (renderer, device) = renderer();
    device.set_completion(FenceCompletion::Manual);

    let submit = renderer.flush().unwrap();
    assert_eq!(
        renderer.wait_for_submit(submit, Duration::ZERO).unwrap(),
        SubmitWait::Timeout
    );
    assert_eq!(
        renderer.wait_for_submit(submit + 5, Duration::ZERO).unwrap(),
        SubmitWait::NotQueued
    );

    device.complete_all();
    assert_eq!(
        renderer.wait_for_submit(submit, Duration::from_secs(1)).unwrap(),
        SubmitWait::Success
    );
    assert_eq!(
        renderer.wait_for_submit(submit, Duration::ZERO).unwrap(),
        SubmitWait::AlreadyFinished
    );
    assert_eq!(renderer.finished_submit(), submit);
}

#[test]
fn flushes_execute_in_recording_order() {
    let (renderer, device) = renderer();
    for label in ["first", "second", "third"] {
        renderer.main_command_buffer().insert_marker(label).unwrap();
        renderer.flush().unwrap();
    }
    renderer.wait_until_idle().unwrap();
    assert_eq!(device.executed_markers(), vec!["first", "second", "third"]);
}

#[test]
fn spliced_primary_buffers_keep_their_position() {
    let (renderer, device) = renderer();
    let mut pool = renderer
        .create_command_buffer_pool(CommandBufferUsage::Standard)
        .unwrap();
    let pooled = &mut pool.create_command_buffers(1).unwrap()[0];
    pooled.insert_marker("pooled").unwrap();

    {
        let mut main = renderer.main_command_buffer();
        main.insert_marker("before").unwrap();
        main.submit(pooled).unwrap();
        main.insert_marker("after").unwrap();
    }
    renderer.flush().unwrap();
    renderer.wait_until_idle().unwrap();

    assert_eq!(device.executed_markers(), vec!["before", "pooled", "after"]);
}

#[test]
fn slot_states_follow_the_ring() {
    let (renderer, device) = renderer();
    device.set_completion(FenceCompletion::Manual);
    let submits = renderer.context().submits();
    assert_eq!(submits.slot_count(), 3);
    assert_eq!(
        submits.slot_states(),
        vec![SlotState::Recording, SlotState::Idle, SlotState::Idle]
    );

    renderer.flush().unwrap();
    assert_eq!(
        submits.slot_states(),
        vec![SlotState::Submitted, SlotState::Recording, SlotState::Idle]
    );

    device.complete_all();
    renderer.wait_until_idle().unwrap();
    assert_eq!(submits.slot_states()[0], SlotState::Idle);
}

#[test]
fn present_flush_signals_the_slot_semaphore() {
    let (renderer, device) = renderer();
    let (submit, semaphore) = renderer.flush_for_present(&[]).unwrap();
    assert_eq!(submit, 1);
    assert!(!semaphore.is_null());
    assert_eq!(device.submit_count(), 1);
}

#[test]
fn slot_reuse_gives_up_after_the_wait_timeout() {
    let (renderer, device) = renderer_with(
        RendererConfig::default()
            .with_submit_slots(2)
            .with_wait_timeout(Duration::from_millis(20)),
    );
    device.set_completion(FenceCompletion::Manual);

    assert_eq!(renderer.flush().unwrap(), 1);
    // Reusing the first slot needs submit 1, which never finishes.
    assert!(matches!(renderer.flush(), Err(AshError::Timeout)));
    assert!(matches!(renderer.flush(), Err(AshError::Timeout)));
    assert_eq!(renderer.submit_count(), 3);

    device.complete_all();
    assert_eq!(renderer.flush().unwrap(), 3);
    device.complete_all();
    renderer.main_command_buffer().insert_marker("recovered").unwrap();
    assert_eq!(renderer.flush().unwrap(), 4);

    device.complete_all();
    renderer.wait_until_idle().unwrap();
    assert_eq!(device.executed_markers(), vec!["recovered"]);
    assert_eq!(device.in_flight_violations(), 0);
}

#[test]
fn device_loss_is_reported_to_the_caller() {
    let (renderer, device) = renderer();
    renderer.flush().unwrap();
    device.set_device_lost(true);
    assert!(matches!(renderer.flush(), Err(AshError::DeviceLost)));
}

#[test]
fn uploads_are_copied_before_the_frame_commands() {
    let (renderer, device) = renderer();
    let data = [9u8; 32];
    let buffer = renderer
        .create_buffer(
            BufferDesc {
                size: 32,
                usage: BufferUsage::STORAGE,
                memory: MemoryHint::GpuOnly,
            },
            Some(&data),
        )
        .unwrap();
    renderer.main_command_buffer().insert_marker("frame").unwrap();
    renderer.flush().unwrap();
    renderer.wait_until_idle().unwrap();

    let commands = device.executed_commands();
    let copy = commands
        .iter()
        .position(|command| {
            matches!(command, RecordedCommand::CopyBuffer { dst, .. } if *dst == buffer.handle())
        })
        .expect("upload copy");
    let marker = commands
        .iter()
        .position(|command| matches!(command, RecordedCommand::Marker(label) if label == "frame"))
        .expect("frame marker");
    assert!(copy < marker);
    assert_eq!(device.buffer_contents(buffer.handle()).unwrap(), data.to_vec());
}
