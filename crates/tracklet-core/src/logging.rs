//! Structured logging field names and subscriber setup for tracklet.
//!
//! Trackers mirror every buffered line to `tracing` so the process log shows
//! the same output as the persisted record. Failures in the tracking plumbing
//! itself (writer errors, unreachable brokers) are reported on the
//! [`SYSTEM_TARGET`] target and never reach business code.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Writer panicked, record lost |
//! | WARN  | Writer failed or degraded to no-op, record dropped |
//! | INFO  | Mirrored session lines, unit of work received |
//! | DEBUG | Captured headers, params, and bodies |

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::level::Level;

/// Target for failures of the tracking plumbing.
pub const SYSTEM_TARGET: &str = "tracklet::system";

/// Target for mirrored session lines.
pub const CONSOLE_TARGET: &str = "tracklet::console";

// ─── Identity fields ───────────────────────────────────────────────────────

/// Trace id shared by a causal chain of units of work.
pub const TRACE_ID: &str = "trace_id";

/// Per-request identifier, unique even when the trace id is inherited.
pub const REQUEST_ID: &str = "request_id";

/// Per-task-execution identifier.
pub const EXECUTION_ID: &str = "execution_id";

/// Configured console name of the tracker that emitted a line.
pub const LOGGER: &str = "logger";

/// Tracker name.
pub const TRACKER: &str = "tracker";

/// Writer name.
pub const WRITER: &str = "writer";

/// Task name (`module.name`).
pub const TASK: &str = "task";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of writers that accepted a record.
pub const ACCEPTED: &str = "accepted";

/// Retry attempt number of a task execution.
pub const RETRIES: &str = "retries";

/// Install the global `tracing` subscriber.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, daily rotation)
///   LOG_ANSI    - "true"/"false" override ANSI colors
///   RUST_LOG    - standard env filter (default: "tracklet=info")
///
/// Returns the file appender guard, which must be held for the process
/// lifetime when `LOG_FILE` is set. A second call leaves the first
/// subscriber in place.
pub fn init() -> Option<WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tracklet=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("tracklet.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let installed = if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .try_init()
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).try_init()
        };
        installed.ok().map(|_| guard)
    } else {
        if log_format == "json" {
            let _ = registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            let _ = registry.with(layer).try_init();
        }
        None
    }
}

/// Emit a mirrored session line as a `tracing` event.
pub(crate) fn mirror(level: Level, logger: &str, trace_id: &str, message: &str) {
    match level {
        Level::Debug => {
            tracing::debug!(target: CONSOLE_TARGET, logger, trace_id, "{}", message)
        }
        Level::Info => {
            tracing::info!(target: CONSOLE_TARGET, logger, trace_id, "{}", message)
        }
        Level::Warn => {
            tracing::warn!(target: CONSOLE_TARGET, logger, trace_id, "{}", message)
        }
        Level::Error => {
            tracing::error!(target: CONSOLE_TARGET, logger, trace_id, "{}", message)
        }
    }
}
