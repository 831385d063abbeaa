//! Worker that runs tasks from a [`TaskQueue`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracklet_core::defaults;

use crate::error::{Error, Result};
use crate::queue::{TaskEnvelope, TaskQueue, TaskReceiver};
use crate::runner::{classify, TaskRunner};
use crate::task::{TaskInvocation, TrackedTask};

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of tasks run concurrently.
    pub max_concurrent: usize,
    /// Delay before a retried task is enqueued again.
    pub retry_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            retry_delay_ms: 0,
        }
    }
}

impl WorkerConfig {
    /// Config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TRACKLET_WORKER_MAX_CONCURRENT` | `4` | Max concurrent tasks |
    /// | `TRACKLET_WORKER_RETRY_DELAY_MS` | `0` | Delay before re-enqueueing a retry |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_concurrent = std::env::var("TRACKLET_WORKER_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.max_concurrent)
            .max(1);
        let retry_delay_ms = std::env::var("TRACKLET_WORKER_RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.retry_delay_ms);
        Self {
            max_concurrent,
            retry_delay_ms,
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_retry_delay(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }
}

/// Event emitted by the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    WorkerStarted,
    TaskStarted {
        execution_id: String,
        task: String,
    },
    TaskCompleted {
        execution_id: String,
        task: String,
        duration_ms: u64,
    },
    /// The task was enqueued again as attempt `retries`.
    TaskRetrying {
        execution_id: String,
        task: String,
        retries: u32,
    },
    TaskFailed {
        execution_id: String,
        task: String,
        error: String,
    },
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    join: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to stop after its in-flight tasks finish.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::WorkerStopped)
    }

    /// Receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Wait for the worker loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            error!(error = ?e, "Worker loop panicked");
        }
    }
}

/// Runs registered tasks as their invocations arrive.
pub struct Worker {
    runner: TaskRunner,
    config: WorkerConfig,
    queue: TaskQueue,
    receiver: TaskReceiver,
    tasks: HashMap<String, Arc<dyn TrackedTask>>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl Worker {
    /// Worker consuming `receiver`. `queue` is the sending half of the same
    /// channel, used to enqueue retries.
    pub fn new(runner: TaskRunner, queue: TaskQueue, receiver: TaskReceiver) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::WORKER_EVENT_CAPACITY);
        Self {
            runner,
            config: WorkerConfig::default(),
            queue,
            receiver,
            tasks: HashMap::new(),
            event_tx,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a task under its full name.
    pub fn register<T: TrackedTask + 'static>(mut self, task: T) -> Self {
        let name = task.full_name();
        debug!(task = %name, "Registered task");
        self.tasks.insert(name, Arc::new(task));
        self
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker loop and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let join = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle {
            shutdown_tx,
            event_rx,
            join,
        }
    }

    async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            tasks = self.tasks.len(),
            max_concurrent = self.config.max_concurrent,
            "Task worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let shared = Arc::new(Shared {
            runner: self.runner.clone(),
            queue: self.queue.clone(),
            tasks: std::mem::take(&mut self.tasks),
            event_tx: self.event_tx.clone(),
            retry_delay: Duration::from_millis(self.config.retry_delay_ms),
        });
        let mut running = JoinSet::new();

        loop {
            while running.len() >= self.config.max_concurrent {
                reap(running.join_next().await);
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Task worker received shutdown signal");
                    break;
                }
                Some(result) = running.join_next(), if !running.is_empty() => {
                    reap(Some(result));
                }
                envelope = self.receiver.recv() => match envelope {
                    Some(envelope) => {
                        let shared = shared.clone();
                        running.spawn(async move { shared.execute(envelope).await });
                    }
                    None => {
                        info!("Task queue closed");
                        break;
                    }
                },
            }
        }

        while let Some(result) = running.join_next().await {
            reap(Some(result));
        }
        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Task worker stopped");
    }
}

fn reap(result: Option<std::result::Result<(), tokio::task::JoinError>>) {
    if let Some(Err(e)) = result {
        error!(error = ?e, "Task panicked");
    }
}

struct Shared {
    runner: TaskRunner,
    queue: TaskQueue,
    tasks: HashMap<String, Arc<dyn TrackedTask>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    retry_delay: Duration,
}

impl Shared {
    async fn execute(&self, envelope: TaskEnvelope) {
        let TaskEnvelope {
            task: name,
            invocation,
            ..
        } = envelope;
        let execution_id = invocation.execution_id.clone();

        let Some(task) = self.tasks.get(&name).cloned() else {
            warn!(task = %name, execution_id = %execution_id, "No task registered under this name");
            let _ = self.event_tx.send(WorkerEvent::TaskFailed {
                execution_id,
                error: Error::UnknownTask(name.clone()).to_string(),
                task: name,
            });
            return;
        };

        let _ = self.event_tx.send(WorkerEvent::TaskStarted {
            execution_id: execution_id.clone(),
            task: name.clone(),
        });

        let started = Instant::now();
        let retries = invocation.retries;
        let next = invocation.next_attempt();
        match self.runner.run(task.as_ref(), invocation).await {
            Ok(_) => {
                let _ = self.event_tx.send(WorkerEvent::TaskCompleted {
                    execution_id,
                    task: name,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
            Err(err) => {
                if classify(task.as_ref(), &err, retries).is_retry() {
                    // Off the run set: a full queue must not hold a concurrency slot.
                    tokio::spawn(requeue(
                        self.queue.clone(),
                        self.event_tx.clone(),
                        self.retry_delay,
                        name,
                        next,
                    ));
                } else {
                    warn!(task = %name, execution_id = %execution_id, error = %err, "Task failed");
                    let _ = self.event_tx.send(WorkerEvent::TaskFailed {
                        execution_id,
                        task: name,
                        error: err.to_string(),
                    });
                }
            }
        }
    }
}

/// Enqueue the next attempt of a retried task, waiting for queue capacity.
async fn requeue(
    queue: TaskQueue,
    event_tx: broadcast::Sender<WorkerEvent>,
    delay: Duration,
    name: String,
    next: TaskInvocation,
) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let execution_id = next.execution_id.clone();
    let retries = next.retries;
    match queue.submit(&name, next).await {
        Ok(_) => {
            debug!(task = %name, execution_id = %execution_id, retries, "Task re-enqueued");
            let _ = event_tx.send(WorkerEvent::TaskRetrying {
                execution_id,
                task: name,
                retries,
            });
        }
        Err(e) => {
            error!(task = %name, execution_id = %execution_id, error = %e, "Failed to re-enqueue task");
            let _ = event_tx.send(WorkerEvent::TaskFailed {
                execution_id,
                task: name,
                error: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_builders() {
        let config = WorkerConfig::default()
            .with_max_concurrent(0)
            .with_retry_delay(25);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.retry_delay_ms, 25);
    }
}
