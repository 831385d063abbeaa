//! Error types for tracked tasks and the task queue.

use std::error::Error as StdError;

use thiserror::Error;
use tracklet_core::{short_type_name, ErrorPayload};

/// Result type for queue and worker operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Queue and worker errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Task queue is closed")]
    QueueClosed,

    #[error("Task queue is full")]
    QueueFull,

    #[error("No task registered under name: {0}")]
    UnknownTask(String),

    #[error("Worker is not running")]
    WorkerStopped,
}

/// How a task run ended when it did not succeed.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task asked to be run again.
    #[error("Retry: {0}")]
    Retry(String),

    /// The task failed. `kind` is the type name of the underlying error.
    #[error("{error}")]
    Failed { kind: String, error: anyhow::Error },
}

impl TaskError {
    pub fn retry(reason: impl Into<String>) -> Self {
        TaskError::Retry(reason.into())
    }

    /// Failure caused by a concrete error, keeping its type name.
    pub fn failed<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        TaskError::Failed {
            kind: short_type_name::<E>().to_string(),
            error: anyhow::Error::new(err),
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, TaskError::Retry(_))
    }

    /// Underlying error of a failure.
    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            TaskError::Failed { error, .. } => Some(error),
            TaskError::Retry(_) => None,
        }
    }

    /// Type, message, and cause chain of the failure.
    pub fn payload(&self) -> ErrorPayload {
        match self {
            TaskError::Retry(reason) => ErrorPayload::new("Retry", reason.clone()),
            TaskError::Failed { kind, error } => ErrorPayload::from_dyn(kind, &**error, true),
        }
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(error: anyhow::Error) -> Self {
        TaskError::Failed {
            kind: "Error".to_string(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_keeps_type_name() {
        let err = TaskError::failed("x".parse::<u32>().unwrap_err());
        let payload = err.payload();
        assert_eq!(payload.kind, "ParseIntError");
        assert_eq!(payload.value, "invalid digit found in string");
        assert!(!err.is_retry());
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: TaskError = anyhow::anyhow!("upstream unavailable").into();
        assert_eq!(err.to_string(), "upstream unavailable");
        assert_eq!(err.payload().kind, "Error");
        assert!(err.error().is_some());
    }

    #[test]
    fn test_retry_display() {
        let err = TaskError::retry("rate limited");
        assert!(err.is_retry());
        assert_eq!(err.to_string(), "Retry: rate limited");
        assert!(err.error().is_none());
    }
}
