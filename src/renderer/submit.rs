use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};

use super::command_pool::CommandBufferChunks;
use super::resource::NOT_SUBMITTED;
use crate::vulkan::{
    CommandBufferBeginDesc, CommandBufferHandle, CommandBufferLevel, CommandPoolHandle,
    FenceHandle, FenceStatus, GpuDevice, SemaphoreHandle, SubmitBatch,
};
use crate::{AshError, Result};

/// Outcome of [`SubmitQueue::wait_for_submit`]. Device loss is reported as
/// `AshError::DeviceLost`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitWait {
    /// The submit had already been observed as finished.
    AlreadyFinished,
    /// The submit index has not been handed out yet.
    NotQueued,
    Timeout,
    /// Waited, and the submit is now finished.
    Success,
}

impl SubmitWait {
    pub fn is_finished(self) -> bool {
        matches!(self, SubmitWait::AlreadyFinished | SubmitWait::Success)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
}

struct SubmitSlot {
    pool: CommandPoolHandle,
    resource_commands: CommandBufferHandle,
    /// Chunked buffers the main command buffer records into. Lent out while
    /// the slot is recording.
    chunks: Option<CommandBufferChunks>,
    fence: FenceHandle,
    semaphore: SemaphoreHandle,
    submit_index: u64,
    state: SlotState,
}

struct SubmitState {
    slots: Vec<SubmitSlot>,
    current: usize,
    submit_count: u64,
    wait_count: u32,
}

/// Ring of submit slots tracking in-flight GPU work.
///
/// Submit indices start at 1 and grow by one per flush. The finished index
/// is only advanced while holding the submit mutex and can be read
/// lock-free.
pub struct SubmitQueue {
    device: Arc<dyn GpuDevice>,
    state: Mutex<SubmitState>,
    wait_condition: Condvar,
    finished: AtomicU64,
    wait_timeout: Duration,
    abort_on_device_loss: bool,
}

impl SubmitQueue {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        slot_count: usize,
        chunk_size: u32,
        wait_timeout: Duration,
        abort_on_device_loss: bool,
    ) -> Result<Self> {
        if slot_count < 2 {
            return Err(AshError::InvalidArgument(format!(
                "submit ring needs at least 2 slots, got {slot_count}"
            )));
        }

        let mut slots: Vec<SubmitSlot> = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            match Self::create_slot(device.as_ref(), chunk_size) {
                Ok(slot) => slots.push(slot),
                Err(err) => {
                    for slot in slots {
                        Self::destroy_slot(device.as_ref(), slot);
                    }
                    return Err(err);
                }
            }
        }

        let queue = Self {
            device,
            state: Mutex::new(SubmitState {
                slots,
                current: 0,
                submit_count: 1,
                wait_count: 0,
            }),
            wait_condition: Condvar::new(),
            finished: AtomicU64::new(0),
            wait_timeout,
            abort_on_device_loss,
        };

        {
            let mut state = queue.state.lock();
            let slot = &mut state.slots[0];
            queue
                .device
                .begin_command_buffer(slot.resource_commands, &one_time_submit())?;
            slot.state = SlotState::Recording;
        }
        debug!("Submit ring created with {slot_count} slots");
        Ok(queue)
    }

    fn create_slot(device: &dyn GpuDevice, chunk_size: u32) -> Result<SubmitSlot> {
        let pool = device.create_command_pool(true)?;
        let resource_commands =
            match device.allocate_command_buffers(pool, CommandBufferLevel::Primary, 1) {
                Ok(buffers) => buffers[0],
                Err(err) => {
                    device.destroy_command_pool(pool);
                    return Err(err);
                }
            };
        let fence = match device.create_fence(false) {
            Ok(fence) => fence,
            Err(err) => {
                device.destroy_command_pool(pool);
                return Err(err);
            }
        };
        let semaphore = match device.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(err) => {
                device.destroy_fence(fence);
                device.destroy_command_pool(pool);
                return Err(err);
            }
        };

        Ok(SubmitSlot {
            pool,
            resource_commands,
            chunks: Some(CommandBufferChunks::new(
                pool,
                CommandBufferLevel::Primary,
                chunk_size,
            )),
            fence,
            semaphore,
            submit_index: NOT_SUBMITTED,
            state: SlotState::Idle,
        })
    }

    fn destroy_slot(device: &dyn GpuDevice, slot: SubmitSlot) {
        device.destroy_semaphore(slot.semaphore);
        device.destroy_fence(slot.fence);
        device.destroy_command_pool(slot.pool);
    }

    /// Most recent submit known to have finished on the GPU.
    pub fn finished_submit(&self) -> u64 {
        self.finished.load(Ordering::Acquire)
    }

    /// Index the next flush will be assigned.
    pub fn submit_count(&self) -> u64 {
        self.state.lock().submit_count
    }

    pub fn slot_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        self.state.lock().slots.iter().map(|slot| slot.state).collect()
    }

    /// Primary buffer of the recording slot that runs before the main
    /// command buffer's work. Uploads and barriers are recorded here.
    pub fn resource_commands(&self) -> CommandBufferHandle {
        let state = self.state.lock();
        state.slots[state.current].resource_commands
    }

    /// Semaphore signaled by the most recent presenting submit.
    pub fn present_semaphore(&self) -> SemaphoreHandle {
        let state = self.state.lock();
        let previous = (state.current + state.slots.len() - 1) % state.slots.len();
        state.slots[previous].semaphore
    }

    /// Hands the recording slot's chunked buffers to the main command buffer.
    pub(crate) fn take_chunks(&self) -> Option<CommandBufferChunks> {
        let mut state = self.state.lock();
        let current = state.current;
        state.slots[current].chunks.take()
    }

    /// Ends and submits the recording slot.
    ///
    /// `command_buffers` are executed after the slot's resource commands, in
    /// order. `chunks` returns the buffers the main command buffer recorded
    /// into so they are recycled with the slot.
    pub(crate) fn submit(
        &self,
        command_buffers: &[CommandBufferHandle],
        chunks: CommandBufferChunks,
        wait_semaphores: &[SemaphoreHandle],
        present: bool,
    ) -> Result<u64> {
        let mut state = self.state.lock();
        let current = state.current;
        let submit_index = state.submit_count;
        state.submit_count += 1;

        let slot = &mut state.slots[current];
        slot.chunks = Some(chunks);
        let previous_index = slot.submit_index;
        slot.submit_index = submit_index;

        self.device.cmd_memory_barrier(slot.resource_commands);
        if let Err(err) = self.device.end_command_buffer(slot.resource_commands) {
            drop(state);
            self.rollback(current, submit_index, previous_index);
            return Err(err);
        }

        let mut submitted = Vec::with_capacity(command_buffers.len() + 1);
        submitted.push(slot.resource_commands);
        submitted.extend_from_slice(command_buffers);

        let semaphore = [slot.semaphore];
        let signal: &[SemaphoreHandle] = if present { &semaphore } else { &[] };
        let batch = SubmitBatch {
            command_buffers: &submitted,
            wait_semaphores,
            signal_semaphores: signal,
        };

        let fence = slot.fence;
        slot.state = SlotState::Submitted;
        drop(state);

        match self.device.queue_submit(&batch, fence) {
            Ok(()) => {}
            Err(AshError::DeviceLost) => return Err(self.device_lost()),
            Err(err) => {
                self.rollback(current, submit_index, previous_index);
                return Err(err);
            }
        }
        debug!("Submitted {} command buffers as submit {submit_index}", submitted.len());
        Ok(submit_index)
    }

    /// Undoes a submit the device rejected. The slot records again from an
    /// empty resource command buffer and the index is handed out again.
    fn rollback(&self, slot_index: usize, submit_index: u64, previous_index: u64) {
        let mut state = self.state.lock();
        if state.submit_count == submit_index + 1 {
            state.submit_count = submit_index;
        }
        let slot = &mut state.slots[slot_index];
        slot.submit_index = previous_index;
        slot.state = SlotState::Recording;
        if let Err(err) = self
            .device
            .begin_command_buffer(slot.resource_commands, &one_time_submit())
        {
            warn!("Could not restart resource commands after a failed submit: {err}");
        }
        warn!("Submit {submit_index} was rejected; its commands were discarded");
    }

    /// Moves to the next slot, waiting for its previous submit before
    /// recycling it, and returns its chunked buffers.
    ///
    /// The wait is bounded by the configured timeout. On any failure the
    /// ring stays on the slot that was just submitted and the call can be
    /// retried.
    pub(crate) fn advance(&self) -> Result<CommandBufferChunks> {
        let mut state = self.state.lock();
        let next = (state.current + 1) % state.slots.len();

        if state.slots[next].state == SlotState::Submitted {
            let fence = state.slots[next].fence;
            let submit_index = state.slots[next].submit_index;
            drop(state);
            self.wait_fence(fence, submit_index)?;
            state = self.state.lock();
            self.mark_finished(&mut state, submit_index);
        }

        // A reset must not race with a thread waiting on the same fence.
        while state.wait_count > 0 {
            self.wait_condition.wait(&mut state);
        }

        let slot = &mut state.slots[next];
        if slot.submit_index != NOT_SUBMITTED {
            self.device.reset_fences(&[slot.fence])?;
        }
        self.device.reset_command_pool(slot.pool)?;
        self.device
            .begin_command_buffer(slot.resource_commands, &one_time_submit())?;
        let mut chunks = slot.chunks.take().ok_or_else(|| {
            AshError::InvalidState("submit slot recycled while still recording".to_string())
        })?;
        chunks.reset();
        slot.state = SlotState::Recording;
        state.current = next;
        Ok(chunks)
    }

    fn wait_fence(&self, fence: FenceHandle, submit_index: u64) -> Result<()> {
        let timeout = self.wait_timeout.as_nanos().min(u64::MAX as u128) as u64;
        match self.device.wait_for_fences(&[fence], timeout) {
            Ok(FenceStatus::Signaled) => Ok(()),
            Ok(FenceStatus::Timeout) => {
                warn!(
                    "Submit {submit_index} did not finish within {:?}; its slot is not reused",
                    self.wait_timeout
                );
                Err(AshError::Timeout)
            }
            Err(AshError::DeviceLost) => Err(self.device_lost()),
            Err(err) => Err(err),
        }
    }

    fn mark_finished(&self, state: &mut SubmitState, submit_index: u64) {
        if submit_index > self.finished.load(Ordering::Acquire) {
            self.finished.store(submit_index, Ordering::Release);
        }
        let finished = self.finished.load(Ordering::Acquire);
        for slot in &mut state.slots {
            if slot.state == SlotState::Submitted && slot.submit_index <= finished {
                slot.state = SlotState::Idle;
            }
        }
    }

    /// Waits until `submit` has finished on the GPU.
    pub fn wait_for_submit(&self, submit: u64, timeout: Duration) -> Result<SubmitWait> {
        let mut state = self.state.lock();
        let finished = self.finished.load(Ordering::Acquire);
        if finished >= submit {
            return Ok(SubmitWait::AlreadyFinished);
        }
        if state.submit_count <= submit {
            return Ok(SubmitWait::NotQueued);
        }

        let fences: Vec<FenceHandle> = state
            .slots
            .iter()
            .filter(|slot| {
                slot.submit_index != NOT_SUBMITTED
                    && slot.submit_index > finished
                    && slot.submit_index <= submit
            })
            .map(|slot| slot.fence)
            .collect();
        state.wait_count += 1;
        drop(state);

        let result = if fences.is_empty() {
            Ok(FenceStatus::Signaled)
        } else {
            self.device
                .wait_for_fences(&fences, timeout.as_nanos().min(u64::MAX as u128) as u64)
        };

        let mut state = self.state.lock();
        state.wait_count -= 1;
        if state.wait_count == 0 {
            self.wait_condition.notify_all();
        }

        match result {
            Ok(FenceStatus::Signaled) => {
                self.mark_finished(&mut state, submit);
                Ok(SubmitWait::Success)
            }
            Ok(FenceStatus::Timeout) => Ok(SubmitWait::Timeout),
            Err(AshError::DeviceLost) => {
                drop(state);
                Err(self.device_lost())
            }
            Err(err) => Err(err),
        }
    }

    /// Waits for every submit issued so far.
    pub fn wait_all(&self, timeout: Duration) -> Result<SubmitWait> {
        let last = self.submit_count().saturating_sub(1);
        self.wait_for_submit(last, timeout)
    }

    fn device_lost(&self) -> AshError {
        error!("GPU device lost; in-flight state is unrecoverable");
        if self.abort_on_device_loss {
            std::process::abort();
        }
        AshError::DeviceLost
    }

    /// Waits for idle and destroys every slot. The queue is unusable
    /// afterwards.
    pub(crate) fn shutdown(&self) {
        if let Err(err) = self.wait_all(self.wait_timeout) {
            warn!("Failed waiting for submits during shutdown: {err}");
        }
        let mut state = self.state.lock();
        while state.wait_count > 0 {
            self.wait_condition.wait(&mut state);
        }
        let slots = std::mem::take(&mut state.slots);
        state.current = 0;
        drop(state);
        for slot in slots {
            Self::destroy_slot(self.device.as_ref(), slot);
        }
    }
}

fn one_time_submit() -> CommandBufferBeginDesc {
    CommandBufferBeginDesc {
        one_time_submit: true,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::{FenceCompletion, HeadlessDevice};

    fn ring(device: &Arc<HeadlessDevice>) -> SubmitQueue {
        SubmitQueue::new(
            Arc::clone(device) as Arc<dyn GpuDevice>,
            3,
            4,
            Duration::from_secs(1),
            false,
        )
        .unwrap()
    }

    fn flush(queue: &SubmitQueue) -> u64 {
        let chunks = queue.take_chunks().unwrap();
        let index = queue.submit(&[], chunks, &[], false).unwrap();
        let next = queue.advance().unwrap();
        // Put the chunks back where the main command buffer would hold them.
        let mut state = queue.state.lock();
        let current = state.current;
        state.slots[current].chunks = Some(next);
        index
    }

    #[test]
    fn submit_indices_start_at_one() {
        let device = Arc::new(HeadlessDevice::new());
        let queue = ring(&device);
        assert_eq!(queue.submit_count(), 1);
        assert_eq!(flush(&queue), 1);
        assert_eq!(flush(&queue), 2);
        assert_eq!(queue.submit_count(), 3);
    }

    #[test]
    fn wait_classifies_indices() {
        let device = Arc::new(HeadlessDevice::new().with_completion(FenceCompletion::Manual));
        let queue = ring(&device);
        let first = flush(&queue);

        assert_eq!(
            queue.wait_for_submit(first + 5, Duration::ZERO).unwrap(),
            SubmitWait::NotQueued
        );
        assert_eq!(
            queue.wait_for_submit(first, Duration::from_millis(1)).unwrap(),
            SubmitWait::Timeout
        );
        device.complete_all();
        assert_eq!(
            queue.wait_for_submit(first, Duration::from_secs(1)).unwrap(),
            SubmitWait::Success
        );
        assert_eq!(queue.finished_submit(), first);
        assert_eq!(
            queue.wait_for_submit(first, Duration::ZERO).unwrap(),
            SubmitWait::AlreadyFinished
        );
    }

    #[test]
    fn reusing_a_slot_waits_for_its_fence() {
        let device = Arc::new(HeadlessDevice::new());
        let queue = ring(&device);
        for _ in 0..7 {
            flush(&queue);
        }
        // Three slots: the oldest recycled slot held submit 5.
        assert!(queue.finished_submit() >= 5);
        assert_eq!(device.in_flight_violations(), 0);
    }

    #[test]
    fn timed_out_reuse_stays_on_the_submitted_slot() {
        let device = Arc::new(HeadlessDevice::new().with_completion(FenceCompletion::Manual));
        let queue = SubmitQueue::new(
            Arc::clone(&device) as Arc<dyn GpuDevice>,
            2,
            4,
            Duration::from_millis(10),
            false,
        )
        .unwrap();
        flush(&queue);
        let chunks = queue.take_chunks().unwrap();
        queue.submit(&[], chunks, &[], false).unwrap();

        assert!(matches!(queue.advance(), Err(AshError::Timeout)));
        assert_eq!(queue.state.lock().current, 1);
        assert_eq!(queue.slot_states(), vec![SlotState::Submitted, SlotState::Submitted]);

        device.complete_all();
        queue.advance().unwrap();
        assert_eq!(queue.state.lock().current, 0);
        assert_eq!(queue.finished_submit(), 1);
    }

    #[test]
    fn device_loss_is_returned_when_not_aborting() {
        let device = Arc::new(HeadlessDevice::new().with_completion(FenceCompletion::Manual));
        let queue = ring(&device);
        let index = flush(&queue);
        device.set_device_lost(true);
        assert!(matches!(
            queue.wait_for_submit(index, Duration::from_secs(1)),
            Err(AshError::DeviceLost)
        ));
    }
}
