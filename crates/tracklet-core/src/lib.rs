//! # tracklet-core
//!
//! Trace sessions, trackers, and record writers.
//!
//! A [`Tracker`] follows one unit of work (an HTTP request or a task
//! execution): it buffers log lines in its root [`Session`], accumulates a
//! structured context, and persists one summary record to its [`Writer`]s.
//! Trackers are built by a shared [`TrackerFactory`] from a
//! [`TrackingConfig`].

pub mod buffer;
pub mod config;
pub mod defaults;
mod dispatch;
pub mod error;
pub mod factory;
pub mod ids;
pub mod level;
pub mod location;
pub mod logging;
pub mod payload;
pub mod record;
pub mod session;
pub mod tracker;
pub mod writer;

// Re-export commonly used types at crate root
pub use buffer::{format_line, LineBuffer};
pub use config::{
    CaptureFormat, Formats, TrackerConfig, TrackerSettings, TrackingConfig, WriterConfig,
};
pub use error::{Error, Result};
pub use factory::TrackerFactory;
pub use ids::{generate_id, inherit_or_generate};
pub use level::Level;
pub use location::SourceLocation;
pub use payload::{short_type_name, ErrorPayload};
pub use record::{HostInfo, Record, RecordFilter, StaticFields};
pub use session::Session;
pub use tracker::{
    Domain, HttpDomain, HttpRequestInfo, HttpTracker, TaskDomain, TaskInfo, TaskTracker, Tracker,
    TrackerContext,
};
pub use writer::{
    ConsoleWriter, MemoryWriter, NoopProducer, Producer, QueueWriter, RedisProducer, Writer,
    WriterRegistry,
};
