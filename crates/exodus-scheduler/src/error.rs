use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is closed")]
    PoolClosed,
}

/// Terminal outcome of a scheduled task that never produced a value.
///
/// Domain-level failures travel inside the task's own return type; these
/// variants cover the two ways the pool itself can resolve a handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),
}

pub type TaskResult<T> = std::result::Result<T, TaskError>;
