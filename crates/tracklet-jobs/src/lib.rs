//! # tracklet-jobs
//!
//! Tracked background tasks for tracklet.
//!
//! This crate provides:
//! - The [`TrackedTask`] trait and a [`TaskRunner`] that wraps every run in a
//!   task tracker and records its outcome
//! - An in-process [`TaskQueue`] and [`Worker`] with retries and worker events
//! - Trace id propagation from HTTP requests and parent tasks into scheduled tasks
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tracklet_core::TrackerFactory;
//! use tracklet_jobs::{TaskQueue, TaskRunner, Worker};
//!
//! let factory = Arc::new(TrackerFactory::from_env()?);
//! let (queue, receiver) = TaskQueue::channel();
//! let handle = Worker::new(TaskRunner::new(factory), queue.clone(), receiver)
//!     .register(ReindexShelf)
//!     .start();
//!
//! queue.delay("catalog.tasks.reindex_shelf", json!({"shelf": 3}), tracker.propagation_headers()).await?;
//!
//! handle.shutdown().await?;
//! ```

pub mod error;
pub mod queue;
pub mod runner;
pub mod task;
pub mod worker;

pub use error::{Error, Result, TaskError};
pub use queue::{TaskEnvelope, TaskQueue, TaskReceiver};
pub use runner::{classify, Interceptor, TaskOutcome, TaskRunner};
pub use task::{TaskContext, TaskInvocation, TrackedTask};
pub use worker::{Worker, WorkerConfig, WorkerEvent, WorkerHandle};
