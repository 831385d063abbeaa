//! Integration tests for the task worker: dispatch, retries, events.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use tracklet_core::{Level, MemoryWriter, TrackerConfig, TrackerFactory, TrackingConfig, WriterConfig};
use tracklet_jobs::{
    TaskContext, TaskError, TaskQueue, TaskRunner, TrackedTask, Worker, WorkerConfig, WorkerEvent,
};

fn runner_with_capture() -> (TaskRunner, Arc<MemoryWriter>) {
    let config = TrackingConfig::default()
        .with_writer("mem", WriterConfig::new("memory"))
        .with_tracker(
            "task-tracker",
            TrackerConfig::new("task").with_writers(["mem"]),
        );
    let factory = TrackerFactory::new(config);
    let capture = Arc::new(MemoryWriter::new("mem", Level::Debug));
    factory.register_writer("mem", capture.clone());
    (TaskRunner::new(Arc::new(factory)), capture)
}

/// Asks for a retry until it has been attempted `succeed_on + 1` times.
struct SyncShelf {
    attempts: Arc<AtomicU32>,
    succeed_on: u32,
}

#[async_trait]
impl TrackedTask for SyncShelf {
    fn module(&self) -> &str {
        "catalog.tasks"
    }

    fn name(&self) -> &str {
        "sync"
    }

    fn max_retries(&self) -> u32 {
        3
    }

    async fn run(&self, ctx: &mut TaskContext, _params: Value) -> Result<Option<Value>, TaskError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if ctx.retries() < self.succeed_on {
            return Err(TaskError::retry(format!("attempt {}", ctx.retries())));
        }
        Ok(Some(json!({"attempts": ctx.retries() + 1})))
    }
}

async fn next_terminal(events: &mut broadcast::Receiver<WorkerEvent>) -> WorkerEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("worker event")
            .expect("event channel open");
        match event {
            WorkerEvent::TaskCompleted { .. } | WorkerEvent::TaskFailed { .. } => return event,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_worker_runs_registered_task() {
    let (runner, capture) = runner_with_capture();
    let (queue, receiver) = TaskQueue::bounded(8);
    let attempts = Arc::new(AtomicU32::new(0));
    let worker = Worker::new(runner, queue.clone(), receiver).register(SyncShelf {
        attempts: attempts.clone(),
        succeed_on: 0,
    });
    let mut events = worker.events();
    let handle = worker.start();

    let id = queue
        .delay("catalog.tasks.sync", json!({}), Map::new())
        .await
        .unwrap();

    match next_terminal(&mut events).await {
        WorkerEvent::TaskCompleted { execution_id, task, .. } => {
            assert_eq!(execution_id, id);
            assert_eq!(task, "catalog.tasks.sync");
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(capture.context_records().len(), 1);

    handle.shutdown().await.unwrap();
    handle.join().await;
}

#[tokio::test]
async fn test_retries_are_reenqueued_with_incremented_count() {
    let (runner, capture) = runner_with_capture();
    let (queue, receiver) = TaskQueue::bounded(8);
    let attempts = Arc::new(AtomicU32::new(0));
    let worker = Worker::new(runner, queue.clone(), receiver)
        .with_config(WorkerConfig::default().with_max_concurrent(1))
        .register(SyncShelf {
            attempts: attempts.clone(),
            succeed_on: 2,
        });
    let mut events = worker.events();
    let handle = worker.start();

    let id = queue
        .delay("catalog.tasks.sync", json!({}), Map::new())
        .await
        .unwrap();

    assert!(matches!(
        next_terminal(&mut events).await,
        WorkerEvent::TaskCompleted { execution_id, .. } if execution_id == id
    ));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    // One record per attempt, all under the same execution and trace ids.
    let records = capture.context_records();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.trace_id == id));
    assert!(records[0].has_warning && !records[0].has_error);
    assert!(records[1].has_warning && !records[1].has_error);
    assert_eq!(records[2].level, Level::Info);
    assert_eq!(records[2].path("execution.data.attempts"), Some(&json!(3)));

    handle.shutdown().await.unwrap();
    handle.join().await;
}

#[tokio::test]
async fn test_retry_budget_exhausted_fails() {
    let (runner, capture) = runner_with_capture();
    let (queue, receiver) = TaskQueue::bounded(8);
    let attempts = Arc::new(AtomicU32::new(0));
    let worker = Worker::new(runner, queue.clone(), receiver).register(SyncShelf {
        attempts: attempts.clone(),
        succeed_on: 10,
    });
    let mut events = worker.events();
    let handle = worker.start();

    queue
        .delay("catalog.tasks.sync", json!({}), Map::new())
        .await
        .unwrap();

    match next_terminal(&mut events).await {
        WorkerEvent::TaskFailed { error, .. } => assert_eq!(error, "Retry: attempt 3"),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    // Attempts with retries left are soft; the last one is the task's failure.
    let records = capture.context_records();
    assert_eq!(records.len(), 4);
    for record in &records[..3] {
        assert_eq!(record.level, Level::Warn);
        assert!(!record.has_error);
        assert!(record.error.is_none());
    }
    let last = &records[3];
    assert_eq!(last.level, Level::Error);
    assert!(last.has_error);
    let error = last.error.as_ref().unwrap();
    assert_eq!(error.kind, "Retry");
    assert_eq!(error.value, "attempt 3");

    handle.shutdown().await.unwrap();
    handle.join().await;
}

#[tokio::test]
async fn test_retries_progress_when_queue_is_full() {
    let (runner, _capture) = runner_with_capture();
    let (queue, receiver) = TaskQueue::bounded(1);
    let attempts = Arc::new(AtomicU32::new(0));
    let worker = Worker::new(runner, queue.clone(), receiver)
        .with_config(
            WorkerConfig::default()
                .with_max_concurrent(1)
                .with_retry_delay(50),
        )
        .register(SyncShelf {
            attempts: attempts.clone(),
            succeed_on: 10,
        });
    let mut events = worker.events();
    let handle = worker.start();

    queue
        .delay("catalog.tasks.sync", json!({"shelf": 1}), Map::new())
        .await
        .unwrap();
    queue
        .delay("catalog.tasks.sync", json!({"shelf": 2}), Map::new())
        .await
        .unwrap();

    for _ in 0..2 {
        assert!(matches!(
            next_terminal(&mut events).await,
            WorkerEvent::TaskFailed { .. }
        ));
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 8);

    handle.shutdown().await.unwrap();
    handle.join().await;
}

#[tokio::test]
async fn test_unknown_task_fails_without_running() {
    let (runner, capture) = runner_with_capture();
    let (queue, receiver) = TaskQueue::bounded(8);
    let worker = Worker::new(runner, queue.clone(), receiver);
    let mut events = worker.events();
    let handle = worker.start();

    queue
        .delay("catalog.tasks.missing", json!({}), Map::new())
        .await
        .unwrap();

    match next_terminal(&mut events).await {
        WorkerEvent::TaskFailed { task, error, .. } => {
            assert_eq!(task, "catalog.tasks.missing");
            assert!(error.contains("catalog.tasks.missing"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(capture.is_empty());

    handle.shutdown().await.unwrap();
    handle.join().await;
}
