//! Record assembly and fan-out shared by a tracker and its detached sessions.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Map;
use tracing::{error, warn};

use crate::defaults;
use crate::level::Level;
use crate::logging::{self, SYSTEM_TARGET};
use crate::record::{current_thread_name, format_timestamp, HostInfo, Record, RecordFilter};
use crate::writer::Writer;

/// Everything a session needs to turn its buffer into a record and deliver it.
#[derive(Clone)]
pub(crate) struct Dispatch {
    pub name: String,
    pub trace_id: String,
    pub record_type: &'static str,
    pub console: String,
    pub writers: Vec<Arc<dyn Writer>>,
    pub filters: Vec<Arc<dyn RecordFilter>>,
}

impl Dispatch {
    pub fn new(name: String, trace_id: String, record_type: &'static str) -> Self {
        Self {
            name,
            trace_id,
            record_type,
            console: defaults::CONSOLE.to_string(),
            writers: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Mirror a line to the process log under this tracker's console name.
    pub fn mirror(&self, level: Level, message: &str) {
        logging::mirror(level, &self.console, &self.trace_id, message);
    }

    /// Build the common envelope. Severity fields are filled by the caller.
    pub fn envelope(&self, with_context: bool, message: String, at: DateTime<Utc>) -> Record {
        let host = HostInfo::current();
        Record {
            version: defaults::RECORD_VERSION.to_string(),
            record_type: self.record_type.to_string(),
            logger_name: self.name.clone(),
            trace_id: self.trace_id.clone(),
            thread_name: current_thread_name(),
            hostname: host.hostname.clone(),
            host_ip: host.host_ip.clone(),
            with_context,
            message,
            timestamp: format_timestamp(at),
            level: Level::Info,
            has_error: false,
            has_warning: false,
            error: None,
            fields: Map::new(),
        }
    }

    /// Apply filters and push the record to every writer.
    ///
    /// Never fails: filter panics, writer errors, and writer panics are
    /// reported on the system target and the next writer still runs.
    /// Returns the number of writers that accepted the record.
    pub fn emit(&self, mut record: Record) -> usize {
        for filter in &self.filters {
            let applied = panic::catch_unwind(AssertUnwindSafe(|| filter.apply(&mut record)));
            if applied.is_err() {
                error!(
                    target: SYSTEM_TARGET,
                    tracker = %self.name,
                    filter = filter.name(),
                    "Record filter panicked, record sent unfiltered"
                );
            }
        }

        let mut accepted = 0;
        for writer in &self.writers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let written = writer.write(&record)?;
                writer.flush()?;
                Ok::<bool, crate::Error>(written)
            }));
            match outcome {
                Ok(Ok(true)) => accepted += 1,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => warn!(
                    target: SYSTEM_TARGET,
                    tracker = %self.name,
                    writer = writer.name(),
                    trace_id = %record.trace_id,
                    error = %e,
                    "Writer failed, record dropped"
                ),
                Err(_) => error!(
                    target: SYSTEM_TARGET,
                    tracker = %self.name,
                    writer = writer.name(),
                    trace_id = %record.trace_id,
                    "Writer panicked, record dropped"
                ),
            }
        }
        accepted
    }
}
