//! Scheduler configuration.

use std::num::NonZeroUsize;

use crate::error::{TaskError, TaskResult};

/// Environment variable overriding the worker count.
pub const WORKERS_ENV: &str = "CHUNKFLOW_WORKERS";

/// Configuration for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of worker threads in the pool.
    pub worker_threads: usize,
    /// Prefix of worker thread names; the worker index is appended.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::all_cores()
    }
}

impl SchedulerConfig {
    /// One worker per logical core.
    #[must_use]
    pub fn all_cores() -> Self {
        Self::with_workers(std::thread::available_parallelism().map_or(1, NonZeroUsize::get))
    }

    #[must_use]
    pub fn with_workers(worker_threads: usize) -> Self {
        Self {
            worker_threads,
            thread_name: "chunkflow-worker".to_string(),
        }
    }

    /// [`Self::all_cores`], with the worker count overridden by
    /// `CHUNKFLOW_WORKERS` when set.
    pub fn from_env() -> TaskResult<Self> {
        let mut config = Self::all_cores();
        if let Ok(value) = std::env::var(WORKERS_ENV) {
            config.worker_threads = parse_workers(&value)?;
        }
        Ok(config)
    }
}

fn parse_workers(value: &str) -> TaskResult<usize> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(TaskError::ZeroWorkers),
        Ok(workers) => Ok(workers),
        Err(_) => Err(TaskError::InvalidConfig {
            key: WORKERS_ENV,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_cores_is_nonzero() {
        assert!(SchedulerConfig::all_cores().worker_threads >= 1);
    }

    #[test]
    fn test_parse_workers() {
        assert_eq!(parse_workers(" 6 ").unwrap(), 6);
        assert!(matches!(parse_workers("0"), Err(TaskError::ZeroWorkers)));
        assert!(matches!(
            parse_workers("many"),
            Err(TaskError::InvalidConfig { key: WORKERS_ENV, .. })
        ));
    }
}
