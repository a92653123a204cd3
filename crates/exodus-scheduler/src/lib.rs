//! Bounded worker pool fed by an unbounded FIFO queue.
//!
//! Work is submitted as an async closure receiving a [`CancellationToken`];
//! submission returns a [`TaskHandle`] that can be polled without blocking
//! and cancelled at any time. Workers never run user code on the submitting
//! thread, and a panicking task is captured into its handle instead of
//! taking a worker down.

mod error;
mod task;

pub use error::{SchedulerError, TaskError, TaskResult};
pub use task::TaskHandle;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Pool of worker tasks draining a shared FIFO queue.
pub struct Scheduler {
    queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    root: CancellationToken,
    next_id: AtomicU64,
}

impl Scheduler {
    /// Spawn a pool with `num_workers` workers (at least one).
    pub fn new(num_workers: usize) -> Self {
        let num_workers = num_workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::with_capacity(num_workers);
        for worker in 0..num_workers {
            let rx = rx.clone();
            workers.push(tokio::spawn(worker_loop(worker, rx)));
        }

        debug!(num_workers, "scheduler started");

        Self {
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            root: CancellationToken::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Enqueue a unit of work and return its handle.
    ///
    /// The closure receives a cancellation token derived from the pool's
    /// lifetime; long-running work is expected to observe it. A task whose
    /// token is already cancelled when a worker picks it up resolves as
    /// [`TaskError::Cancelled`] without running.
    pub fn add_work<T, F, Fut>(&self, work: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = queue.as_ref() else {
            return Err(SchedulerError::PoolClosed);
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.root.child_token();
        let handle = TaskHandle::new(id, cancel.clone());

        let resolver = handle.clone();
        let job: Job = Box::pin(async move {
            if cancel.is_cancelled() {
                resolver.resolve(Err(TaskError::Cancelled));
                return;
            }
            match AssertUnwindSafe(work(cancel)).catch_unwind().await {
                Ok(value) => resolver.resolve(Ok(value)),
                Err(panic) => {
                    let message = panic_message(panic);
                    tracing::error!(task = id, panic = %message, "task panicked");
                    resolver.resolve(Err(TaskError::Panicked(message)));
                }
            }
        });

        tx.send(job).map_err(|_| SchedulerError::PoolClosed)?;
        Ok(handle)
    }

    /// Close the pool: reject further submissions, cancel outstanding work
    /// and join the workers.
    ///
    /// Queued tasks that have not started resolve as cancelled; running
    /// tasks are signalled through their tokens and drained best-effort.
    pub async fn close(&self) {
        let tx = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if tx.is_none() {
            return;
        }
        drop(tx);
        self.root.cancel();

        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for worker in workers {
            let _ = worker.await;
        }
        debug!("scheduler closed");
    }
}

async fn worker_loop(worker: usize, rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>) {
    loop {
        // Claiming a job requires the receiver lock; running it does not,
        // so a slow task only occupies this worker's slot.
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        match job {
            Some(job) => job.await,
            None => break,
        }
    }
    debug!(worker, "worker stopped");
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_resolved<T: Clone + Send + 'static>(handle: &TaskHandle<T>) -> TaskResult<T> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(result) = handle.poll() {
                    return result;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task did not resolve in time")
    }

    #[tokio::test]
    async fn add_work_resolves_with_value() {
        let scheduler = Scheduler::new(2);
        let handle = scheduler.add_work(|_cancel| async { 41 + 1 }).unwrap();

        assert_eq!(wait_resolved(&handle).await, Ok(42));
        assert!(handle.is_resolved());
        scheduler.close().await;
    }

    #[tokio::test]
    async fn poll_is_idempotent_after_resolution() {
        let scheduler = Scheduler::new(1);
        let handle = scheduler.add_work(|_cancel| async { "done" }).unwrap();

        let first = wait_resolved(&handle).await;
        for _ in 0..3 {
            assert_eq!(handle.poll(), Some(first.clone()));
        }
        scheduler.close().await;
    }

    #[tokio::test]
    async fn stop_signals_the_running_task() {
        let scheduler = Scheduler::new(1);
        let handle = scheduler
            .add_work(|cancel| async move {
                cancel.cancelled().await;
                "observed"
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_resolved());

        handle.stop();
        assert_eq!(wait_resolved(&handle).await, Ok("observed"));
        scheduler.close().await;
    }

    #[tokio::test]
    async fn queued_task_is_cancelled_before_running() {
        let scheduler = Scheduler::new(1);
        // Occupy the only worker so the second task stays queued.
        let blocker = scheduler
            .add_work(|cancel| async move {
                cancel.cancelled().await;
            })
            .unwrap();
        let queued = scheduler.add_work(|_cancel| async { "ran" }).unwrap();

        queued.stop();
        blocker.stop();

        assert_eq!(wait_resolved(&queued).await, Err(TaskError::Cancelled));
        scheduler.close().await;
    }

    #[tokio::test]
    async fn close_rejects_new_work() {
        let scheduler = Scheduler::new(1);
        scheduler.close().await;

        let result = scheduler.add_work(|_cancel| async {});
        assert!(matches!(result, Err(SchedulerError::PoolClosed)));
    }

    #[tokio::test]
    async fn panic_is_captured_and_pool_survives() {
        let scheduler = Scheduler::new(1);
        let panicking: TaskHandle<()> = scheduler
            .add_work(|_cancel| async { panic!("boom") })
            .unwrap();

        match wait_resolved(&panicking).await {
            Err(TaskError::Panicked(message)) => assert!(message.contains("boom")),
            other => panic!("unexpected result: {other:?}"),
        }

        let next = scheduler.add_work(|_cancel| async { 7 }).unwrap();
        assert_eq!(wait_resolved(&next).await, Ok(7));
        scheduler.close().await;
    }

    #[tokio::test]
    async fn single_worker_runs_fifo() {
        let scheduler = Scheduler::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let order = order.clone();
                scheduler
                    .add_work(move |_cancel| async move {
                        order.lock().unwrap().push(n);
                    })
                    .unwrap()
            })
            .collect();

        for handle in &handles {
            wait_resolved(handle).await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        scheduler.close().await;
    }
}
