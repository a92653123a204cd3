//! One-shot handles to scheduled background work.
//!
//! A [`TaskHandle`] is returned by [`Scheduler::add_work`](crate::Scheduler::add_work)
//! and stays valid after the pool has moved on: polling is non-blocking and,
//! once the task resolves, keeps returning the same result forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::error::TaskResult;

/// Handle to a single unit of scheduled work.
pub struct TaskHandle<T> {
    id: u64,
    cancel: CancellationToken,
    slot: Arc<Mutex<Option<TaskResult<T>>>>,
    resolved: Arc<AtomicBool>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            cancel: self.cancel.clone(),
            slot: self.slot.clone(),
            resolved: self.resolved.clone(),
        }
    }
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: u64, cancel: CancellationToken) -> Self {
        Self {
            id,
            cancel,
            slot: Arc::new(Mutex::new(None)),
            resolved: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Identifier assigned by the scheduler, unique within its lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Snapshot read of the resolution flag.
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Request cancellation of the task.
    ///
    /// Idempotent. The running closure is expected to observe its
    /// [`CancellationToken`] and abort; a task that has not started yet
    /// resolves as cancelled without running. Has no effect once the task
    /// is resolved.
    pub fn stop(&self) {
        if !self.is_resolved() {
            tracing::debug!(task = self.id, "cancellation requested");
            self.cancel.cancel();
        }
    }

    /// Record the terminal result. First write wins.
    pub(crate) fn resolve(&self, result: TaskResult<T>) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(result);
            self.resolved.store(true, Ordering::Release);
        }
    }
}

impl<T: Clone> TaskHandle<T> {
    /// Non-blocking read of the task outcome.
    ///
    /// Returns `None` until the task resolves, then the same `Some(result)`
    /// on every subsequent call.
    pub fn poll(&self) -> Option<TaskResult<T>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
