//! Scheduler error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    /// The worker pool could not be started.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// An environment override could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidConfig { key: &'static str, value: String },

    #[error("worker pool needs at least one thread")]
    ZeroWorkers,
}

pub type TaskResult<T> = Result<T, TaskError>;
