//! Centralized default constants for tracklet.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration falls back to these when a key is absent.

use crate::level::Level;

// =============================================================================
// SESSIONS
// =============================================================================

/// Maximum number of buffered lines per session. Later lines are dropped.
pub const BUFFER_SIZE: usize = 1000;

/// Minimum level for session writes and writer output.
pub const LEVEL: Level = Level::Info;

/// Name reported by console mirror events when a tracker names no console.
pub const CONSOLE: &str = "tracklet";

// =============================================================================
// TRACKERS
// =============================================================================

/// Tracker resolved by the HTTP adapter when none is named.
pub const HTTP_TRACKER: &str = "http-tracker";

/// Tracker resolved by the task adapter when none is named.
pub const TASK_TRACKER: &str = "task-tracker";

/// Reserved task header carrying the upstream trace id.
pub const TRACE_ID_HEADER: &str = "_trace_id";

/// Schema version written to every record as `@version`.
pub const RECORD_VERSION: &str = "1";

// =============================================================================
// WRITERS
// =============================================================================

/// Default queue topic (Redis stream key) for the queue writer.
pub const QUEUE_TOPIC: &str = "tracker";

/// Default broker URL for the queue writer.
pub const QUEUE_URL: &str = "redis://127.0.0.1:6379";

/// Capacity of the in-process buffer between `send` and the publisher thread.
pub const QUEUE_CAPACITY: usize = 1024;

/// Connection timeout used when a queue writer is first constructed.
pub const QUEUE_CONNECT_TIMEOUT_MS: u64 = 500;

// =============================================================================
// HTTP
// =============================================================================

/// Inbound request header carrying an upstream trace id.
pub const HTTP_TRACE_HEADER: &str = "h-trace-id";

/// Largest request/response body captured into a record.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

// =============================================================================
// TASKS
// =============================================================================

/// Default maximum automatic retries for a task.
pub const TASK_MAX_RETRIES: u32 = 3;

/// Capacity of the in-process task queue.
pub const TASK_QUEUE_CAPACITY: usize = 256;

/// Capacity of the worker event broadcast channel.
pub const WORKER_EVENT_CAPACITY: usize = 256;
