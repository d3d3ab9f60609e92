use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::submit::{SubmitQueue, SubmitWait};
use crate::{AshError, Result};

/// Submit index of objects that never reached the queue.
pub const NOT_SUBMITTED: u64 = u64::MAX;

/// In-use record attached to every GPU-backed object.
///
/// An object may only be destroyed once no command buffer references it and
/// the last submit it took part in has finished on the GPU.
#[derive(Debug)]
pub struct ResourceUsage {
    command_buffer_count: AtomicU32,
    last_used_submit: Mutex<u64>,
}

impl ResourceUsage {
    pub fn new() -> Self {
        Self {
            command_buffer_count: AtomicU32::new(0),
            last_used_submit: Mutex::new(NOT_SUBMITTED),
        }
    }

    pub fn add_command_buffer_ref(&self) {
        self.command_buffer_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn remove_command_buffer_ref(&self) {
        let previous = self
            .command_buffer_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });
        debug_assert!(previous.is_ok(), "command buffer reference count underflow");
    }

    pub fn command_buffer_count(&self) -> u32 {
        self.command_buffer_count.load(Ordering::Acquire)
    }

    /// Records that the object took part in `submit`. Never moves backwards.
    pub fn mark_last_used(&self, submit: u64) {
        let mut last_used = self.last_used_submit.lock();
        if *last_used == NOT_SUBMITTED || submit > *last_used {
            *last_used = submit;
        }
    }

    pub fn last_used_submit(&self) -> u64 {
        *self.last_used_submit.lock()
    }

    pub fn is_in_use(&self, finished_submit: u64) -> bool {
        if self.command_buffer_count() > 0 {
            return true;
        }

        let last_used = self.last_used_submit();
        last_used != NOT_SUBMITTED && last_used > finished_submit
    }

    /// Blocks until [`is_in_use`](Self::is_in_use) turns false.
    ///
    /// Only meant for synchronous teardown points such as command pool
    /// resets.
    pub fn wait_until_not_in_use(&self, submits: &SubmitQueue, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_in_use(submits.finished_submit()) {
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AshError::Timeout);
            }

            if self.command_buffer_count() > 0 {
                std::thread::sleep(Duration::from_micros(50).min(remaining));
                continue;
            }

            match submits.wait_for_submit(self.last_used_submit(), remaining)? {
                SubmitWait::AlreadyFinished | SubmitWait::Success => {}
                SubmitWait::NotQueued | SubmitWait::Timeout => return Err(AshError::Timeout),
            }
        }
    }
}

impl Default for ResourceUsage {
    fn default() -> Self {
        Self::new()
    }
}

/// Object whose GPU lifetime is governed by a [`ResourceUsage`].
pub trait GpuResource: Send + Sync {
    fn usage(&self) -> &ResourceUsage;
}
