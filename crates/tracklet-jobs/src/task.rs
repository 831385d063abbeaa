//! Tracked task definition and per-run context.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracklet_core::{defaults, generate_id, Level, SourceLocation, TaskTracker};

use crate::error::{Result, TaskError};
use crate::queue::TaskQueue;

/// A unit of background work run under a [`TaskTracker`].
#[async_trait]
pub trait TrackedTask: Send + Sync {
    /// Module path reported in the `task` map.
    fn module(&self) -> &str;

    fn name(&self) -> &str;

    /// Source file reported in the `task` map.
    fn filename(&self) -> &str {
        ""
    }

    /// Registered name, `module.name`.
    fn full_name(&self) -> String {
        format!("{}.{}", self.module(), self.name())
    }

    fn max_retries(&self) -> u32 {
        defaults::TASK_MAX_RETRIES
    }

    /// Whether a failure is retried automatically while retries remain.
    fn autoretry_for(&self, _err: &anyhow::Error) -> bool {
        false
    }

    async fn run(&self, ctx: &mut TaskContext, params: Value) -> std::result::Result<Option<Value>, TaskError>;
}

/// One request to run a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInvocation {
    pub execution_id: String,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub retries: u32,
}

impl TaskInvocation {
    /// Fresh invocation with a generated execution id.
    pub fn new(params: Value) -> Self {
        Self {
            execution_id: generate_id(),
            headers: Map::new(),
            params,
            retries: 0,
        }
    }

    pub fn with_headers(mut self, headers: Map<String, Value>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Upstream trace id from the headers, else the execution id.
    pub fn trace_id(&self) -> &str {
        self.headers
            .get(defaults::TRACE_ID_HEADER)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.execution_id)
    }

    /// The same invocation, run once more.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.retries += 1;
        next
    }
}

/// What a running task sees: its tracker and invocation metadata.
pub struct TaskContext {
    tracker: TaskTracker,
    execution_id: String,
    retries: u32,
}

impl TaskContext {
    pub fn new(tracker: TaskTracker, invocation: &TaskInvocation) -> Self {
        Self {
            tracker,
            execution_id: invocation.execution_id.clone(),
            retries: invocation.retries,
        }
    }

    pub fn tracker(&mut self) -> &mut TaskTracker {
        &mut self.tracker
    }

    pub fn into_tracker(self) -> TaskTracker {
        self.tracker
    }

    pub fn trace_id(&self) -> &str {
        self.tracker.trace_id()
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Attempts made before this one.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    #[track_caller]
    pub fn debug(&mut self, message: impl AsRef<str>) -> bool {
        self.tracker.log_at(Level::Debug, SourceLocation::caller(), message)
    }

    #[track_caller]
    pub fn info(&mut self, message: impl AsRef<str>) -> bool {
        self.tracker.log_at(Level::Info, SourceLocation::caller(), message)
    }

    #[track_caller]
    pub fn warn(&mut self, message: impl AsRef<str>) -> bool {
        self.tracker.log_at(Level::Warn, SourceLocation::caller(), message)
    }

    #[track_caller]
    pub fn error(&mut self, message: impl AsRef<str>) -> bool {
        self.tracker.log_at(Level::Error, SourceLocation::caller(), message)
    }

    /// Enqueue `task` carrying this run's trace id. Returns the new
    /// execution id.
    ///
    /// Never waits for queue capacity: the worker running this task may be
    /// the only consumer, so a saturated queue fails with `QueueFull`.
    pub fn schedule(&self, queue: &TaskQueue, task: &str, params: Value) -> Result<String> {
        let invocation = TaskInvocation::new(params).with_headers(self.tracker.propagation_headers());
        queue.try_submit(task, invocation)
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("trace_id", &self.tracker.trace_id())
            .field("execution_id", &self.execution_id)
            .field("retries", &self.retries)
            .finish()
    }
}
