//! Runs tracked tasks under a task tracker.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};
use tracklet_core::logging::SYSTEM_TARGET;
use tracklet_core::{ErrorPayload, TaskDomain, TaskInfo, TaskTracker, TrackerFactory};

use crate::error::TaskError;
use crate::task::{TaskContext, TaskInvocation, TrackedTask};

/// How a task run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    /// The task asked to be retried.
    Retry,
    /// A failure eligible for automatic retry, with retries left.
    AutoRetry,
    /// Final failure.
    Failed,
    Panicked,
}

impl TaskOutcome {
    /// Soft outcomes: the run is logged as an error but the task is not
    /// marked failed.
    pub fn is_retry(self) -> bool {
        matches!(self, TaskOutcome::Retry | TaskOutcome::AutoRetry)
    }
}

/// Classify a task error for the attempt numbered `retries`.
///
/// Both kinds of retry are soft only while the task has retries left; past
/// `max_retries` the attempt is the task's final failure.
pub fn classify(task: &dyn TrackedTask, err: &TaskError, retries: u32) -> TaskOutcome {
    match err {
        TaskError::Retry(_) if retries < task.max_retries() => TaskOutcome::Retry,
        TaskError::Retry(_) => TaskOutcome::Failed,
        TaskError::Failed { error, .. }
            if retries < task.max_retries() && task.autoretry_for(error) =>
        {
            TaskOutcome::AutoRetry
        }
        TaskError::Failed { .. } => TaskOutcome::Failed,
    }
}

/// Hook around every tracked run.
///
/// `before` sees the tracker after task info, headers, and params are set.
/// `after` sees it after the outcome is recorded and before the duration and
/// persistence.
pub trait Interceptor: Send + Sync {
    fn before(&self, _tracker: &mut TaskTracker, _invocation: &TaskInvocation) {}

    fn after(&self, _tracker: &mut TaskTracker, _outcome: TaskOutcome) {}
}

/// Runs tasks, one task tracker per run.
#[derive(Clone)]
pub struct TaskRunner {
    factory: Arc<TrackerFactory>,
    tracker_name: Option<String>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl TaskRunner {
    pub fn new(factory: Arc<TrackerFactory>) -> Self {
        Self {
            factory,
            tracker_name: None,
            interceptors: Vec::new(),
        }
    }

    /// Resolve `name` instead of the configured `task_tracker`.
    pub fn with_tracker_name(mut self, name: impl Into<String>) -> Self {
        self.tracker_name = Some(name.into());
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn factory(&self) -> &Arc<TrackerFactory> {
        &self.factory
    }

    fn build_tracker(&self, trace_id: &str) -> TaskTracker {
        let built = match self.tracker_name.as_deref() {
            Some(name) => self.factory.tracker::<TaskDomain>(name, Some(trace_id)),
            None => self.factory.task_tracker(Some(trace_id)),
        };
        built.unwrap_or_else(|e| {
            warn!(
                target: SYSTEM_TARGET,
                trace_id = %trace_id,
                error = %e,
                "Failed to build task tracker, running untracked"
            );
            TaskTracker::new(
                self.tracker_name
                    .as_deref()
                    .unwrap_or(&self.factory.config().task_tracker),
                Some(trace_id),
            )
        })
    }

    /// Run `task` once and persist its tracker.
    ///
    /// Failures are recorded by outcome: a retry request with retries left is
    /// logged as an error line, an auto-retryable failure with retries left
    /// as an observed exception, anything else as the run's error. The task's own result is
    /// returned unchanged. A panic is recorded as the run's error and resumed
    /// after persisting.
    pub async fn run(
        &self,
        task: &dyn TrackedTask,
        invocation: TaskInvocation,
    ) -> Result<Option<Value>, TaskError> {
        let started = Instant::now();
        let mut tracker = self.build_tracker(invocation.trace_id());

        tracker.set_task_info(TaskInfo {
            id: invocation.execution_id.clone(),
            name: task.name().to_string(),
            module: task.module().to_string(),
            filename: task.filename().to_string(),
        });
        tracker.set_task_headers(Value::Object(invocation.headers.clone()));
        tracker.set_task_params(invocation.params.clone());
        for interceptor in &self.interceptors {
            interceptor.before(&mut tracker, &invocation);
        }

        let mut ctx = TaskContext::new(tracker, &invocation);
        let caught = AssertUnwindSafe(task.run(&mut ctx, invocation.params.clone()))
            .catch_unwind()
            .await;
        let mut tracker = ctx.into_tracker();

        let result = match caught {
            Ok(result) => result,
            Err(panic) => {
                tracker.set_error_payload(ErrorPayload::from_panic(&*panic));
                self.conclude(tracker, TaskOutcome::Panicked, started);
                std::panic::resume_unwind(panic);
            }
        };

        let outcome = match &result {
            Ok(data) => {
                if let Some(data) = data {
                    tracker.set_task_data(data.clone());
                }
                TaskOutcome::Succeeded
            }
            Err(err) => {
                let outcome = classify(task, err, invocation.retries);
                match outcome {
                    TaskOutcome::Retry => {
                        tracker.error(err.to_string());
                    }
                    TaskOutcome::AutoRetry => {
                        tracker.exception_payload(err.payload());
                    }
                    _ => tracker.set_error_payload(err.payload()),
                }
                outcome
            }
        };

        self.conclude(tracker, outcome, started);
        result
    }

    fn conclude(&self, mut tracker: TaskTracker, outcome: TaskOutcome, started: Instant) {
        for interceptor in &self.interceptors {
            interceptor.after(&mut tracker, outcome);
        }
        let duration = started.elapsed();
        tracker.set_task_result(duration);
        let execution_id = tracker.execution_id().unwrap_or_default().to_string();
        let accepted = tracker.persistent();
        debug!(
            execution_id = %execution_id,
            ?outcome,
            duration_ms = duration.as_millis() as u64,
            accepted,
            "Task run concluded"
        );
    }
}
