//! In-process task queue.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;
use tracklet_core::defaults;

use crate::error::{Error, Result};
use crate::task::TaskInvocation;

/// A task invocation waiting in the queue.
#[derive(Debug, Clone)]
pub struct TaskEnvelope {
    /// Registered task name, `module.name`.
    pub task: String,
    pub invocation: TaskInvocation,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(task: impl Into<String>, invocation: TaskInvocation) -> Self {
        Self {
            task: task.into(),
            invocation,
            enqueued_at: Utc::now(),
        }
    }
}

/// Receiving half of a [`TaskQueue`], consumed by a worker.
pub type TaskReceiver = mpsc::Receiver<TaskEnvelope>;

/// Cloneable sending half of the task queue.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<TaskEnvelope>,
}

impl TaskQueue {
    /// Bounded queue with the default capacity.
    pub fn channel() -> (Self, TaskReceiver) {
        Self::bounded(defaults::TASK_QUEUE_CAPACITY)
    }

    pub fn bounded(capacity: usize) -> (Self, TaskReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue `invocation` for `task`, waiting for room. Returns the
    /// execution id.
    pub async fn submit(&self, task: &str, invocation: TaskInvocation) -> Result<String> {
        let execution_id = invocation.execution_id.clone();
        self.tx
            .send(TaskEnvelope::new(task, invocation))
            .await
            .map_err(|_| Error::QueueClosed)?;
        debug!(task, execution_id = %execution_id, "Task enqueued");
        Ok(execution_id)
    }

    /// Enqueue without waiting; fails with `QueueFull` when saturated.
    pub fn try_submit(&self, task: &str, invocation: TaskInvocation) -> Result<String> {
        let execution_id = invocation.execution_id.clone();
        self.tx
            .try_send(TaskEnvelope::new(task, invocation))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::QueueFull,
                mpsc::error::TrySendError::Closed(_) => Error::QueueClosed,
            })?;
        debug!(task, execution_id = %execution_id, "Task enqueued");
        Ok(execution_id)
    }

    /// Enqueue `task` with `params`, attaching `headers` (typically a
    /// tracker's propagation headers).
    pub async fn delay(&self, task: &str, params: Value, headers: Map<String, Value>) -> Result<String> {
        self.submit(task, TaskInvocation::new(params).with_headers(headers))
            .await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
