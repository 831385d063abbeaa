//! Trackers: one per unit of work (an HTTP request or a task execution).
//!
//! A tracker owns the root session, accumulates a structured context, and
//! persists exactly one context-bearing record when it is concluded with
//! [`Tracker::persistent`] (or, failing that, when it is dropped).
//!
//! The HTTP and task variants share all of this and differ only in their
//! [`Domain`]: the sub-maps merged into the context record and the fields
//! that identify the unit of work on light records.

mod http;
mod task;

pub use http::{ApiInfo, HttpDomain, HttpInfo, HttpRequestInfo, RequestInfo, ResponseInfo};
pub use task::{ExecutionInfo, TaskDomain, TaskIdentity, TaskInfo};

use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::error;

use crate::config::TrackerSettings;
use crate::defaults;
use crate::dispatch::Dispatch;
use crate::ids::inherit_or_generate;
use crate::level::Level;
use crate::location::SourceLocation;
use crate::logging::SYSTEM_TARGET;
use crate::payload::ErrorPayload;
use crate::record::{Record, RecordFilter};
use crate::session::Session;
use crate::writer::Writer;

/// HTTP request tracker.
pub type HttpTracker = Tracker<HttpDomain>;

/// Task execution tracker.
pub type TaskTracker = Tracker<TaskDomain>;

/// Domain-specific part of a tracker's context.
pub trait Domain: Default + Send + 'static {
    /// Class name used in tracker configuration (`http`, `task`).
    const CLASS: &'static str;

    /// Value of the record `type` field.
    const RECORD_TYPE: &'static str;

    /// Sub-maps merged into the context-bearing record.
    fn context(&self) -> Map<String, Value>;

    /// Identifying fields carried by light (detached session) records.
    fn identity(&self) -> Map<String, Value>;
}

/// Severity and error state accumulated over one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerContext {
    /// Worst severity across the unit of work. Starts at INFO.
    pub level: Level,
    pub has_error: bool,
    pub has_warning: bool,
    /// Authoritative failure, set by `set_error`.
    pub error: Option<ErrorPayload>,
    pub attrs: Map<String, Value>,
}

impl Default for TrackerContext {
    fn default() -> Self {
        Self {
            level: Level::Info,
            has_error: false,
            has_warning: false,
            error: None,
            attrs: Map::new(),
        }
    }
}

pub struct Tracker<D: Domain> {
    created_at: DateTime<Utc>,
    dispatch: Arc<Dispatch>,
    session: Session,
    context: TrackerContext,
    domain: D,
    settings: TrackerSettings,
    persisted: bool,
}

impl<D: Domain> Tracker<D> {
    /// Tracker with default settings and no writers.
    ///
    /// `trace_id` is inherited when present, generated otherwise.
    pub fn new(name: impl Into<String>, trace_id: Option<&str>) -> Self {
        Self::with_settings(name, trace_id, TrackerSettings::default())
    }

    pub fn with_settings(
        name: impl Into<String>,
        trace_id: Option<&str>,
        settings: TrackerSettings,
    ) -> Self {
        let mut dispatch = Dispatch::new(
            name.into(),
            inherit_or_generate(trace_id),
            D::RECORD_TYPE,
        );
        dispatch.console = settings.console.clone();
        let dispatch = Arc::new(dispatch);
        let domain = D::default();
        let session = Session::new(
            Arc::clone(&dispatch),
            domain.identity(),
            settings.level,
            settings.buffer_size,
            true,
            false,
        );

        Self {
            created_at: Utc::now(),
            dispatch,
            session,
            context: TrackerContext::default(),
            domain,
            settings,
            persisted: false,
        }
    }

    pub fn with_writer(mut self, writer: Arc<dyn Writer>) -> Self {
        self.update_dispatch(|d| d.writers.push(writer));
        self
    }

    pub fn with_writers<I>(mut self, writers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Writer>>,
    {
        self.update_dispatch(|d| d.writers.extend(writers));
        self
    }

    /// Apply `filter` to every record before it reaches the writers.
    pub fn with_filter(mut self, filter: Arc<dyn RecordFilter>) -> Self {
        self.update_dispatch(|d| d.filters.push(filter));
        self
    }

    fn update_dispatch<F: FnOnce(&mut Dispatch)>(&mut self, f: F) {
        f(Arc::make_mut(&mut self.dispatch));
        self.session.set_dispatch(Arc::clone(&self.dispatch));
    }

    /// Mutate the domain and refresh the identity carried by new sessions.
    pub(crate) fn update_domain<F: FnOnce(&mut D)>(&mut self, f: F) {
        f(&mut self.domain);
        self.session.set_identity(self.domain.identity());
    }

    // ---- identity ---------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.dispatch.name
    }

    pub fn trace_id(&self) -> &str {
        &self.dispatch.trace_id
    }

    /// Replace the trace id. Sessions forked earlier keep the old one.
    pub fn set_trace_id(&mut self, trace_id: impl Into<String>) {
        let trace_id = trace_id.into();
        self.update_dispatch(|d| d.trace_id = trace_id);
    }

    /// Headers to attach to downstream work so it joins this trace.
    pub fn propagation_headers(&self) -> Map<String, Value> {
        let mut headers = Map::new();
        headers.insert(
            defaults::TRACE_ID_HEADER.to_string(),
            Value::String(self.trace_id().to_string()),
        );
        headers
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn context(&self) -> &TrackerContext {
        &self.context
    }

    pub fn domain(&self) -> &D {
        &self.domain
    }

    /// The root session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn level(&self) -> Level {
        self.context.level
    }

    pub fn has_error(&self) -> bool {
        self.context.has_error
    }

    pub fn has_warning(&self) -> bool {
        self.context.has_warning
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.context.attrs.insert(key.into(), value.into());
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.context.attrs.get(key)
    }

    // ---- logging ----------------------------------------------------------

    #[track_caller]
    pub fn debug(&mut self, message: impl AsRef<str>) -> bool {
        self.log_at(Level::Debug, SourceLocation::caller(), message)
    }

    #[track_caller]
    pub fn info(&mut self, message: impl AsRef<str>) -> bool {
        self.log_at(Level::Info, SourceLocation::caller(), message)
    }

    #[track_caller]
    pub fn warn(&mut self, message: impl AsRef<str>) -> bool {
        self.log_at(Level::Warn, SourceLocation::caller(), message)
    }

    #[track_caller]
    pub fn error(&mut self, message: impl AsRef<str>) -> bool {
        self.log_at(Level::Error, SourceLocation::caller(), message)
    }

    /// Write to the root session. WARN and ERROR lines mark the tracker as
    /// having a warning; neither sets `has_error`.
    pub fn log_at(
        &mut self,
        level: Level,
        location: SourceLocation,
        message: impl AsRef<str>,
    ) -> bool {
        let written = self.session.log_at(level, location, message);
        if written && level >= Level::Warn {
            self.observe();
        }
        written
    }

    /// Record an observed error on the root session.
    #[track_caller]
    pub fn exception<E>(&mut self, err: &E) -> bool
    where
        E: StdError + ?Sized,
    {
        self.exception_with(err, true)
    }

    /// [`exception`](Self::exception) with the stack lines optional.
    #[track_caller]
    pub fn exception_with<E>(&mut self, err: &E, with_stack: bool) -> bool
    where
        E: StdError + ?Sized,
    {
        self.exception_payload(ErrorPayload::from_error(err, with_stack))
    }

    #[track_caller]
    pub fn exception_payload(&mut self, payload: ErrorPayload) -> bool {
        let written = self.session.exception_payload(payload);
        if written {
            self.observe();
        }
        written
    }

    fn observe(&mut self) {
        self.context.has_warning = true;
        if self.context.level < Level::Warn {
            self.context.level = Level::Warn;
        }
    }

    /// Raise the context level to at least `level`.
    pub(crate) fn raise(&mut self, level: Level) {
        if self.context.level < level {
            self.context.level = level;
        }
    }

    /// Mark the unit of work as failed. A later call replaces the payload.
    pub fn set_error<E>(&mut self, err: &E)
    where
        E: StdError + ?Sized,
    {
        self.set_error_payload(ErrorPayload::from_error(err, true));
    }

    pub fn set_error_payload(&mut self, payload: ErrorPayload) {
        self.context.level = Level::Error;
        self.context.has_error = true;
        self.dispatch.mirror(Level::Error, &payload.title());
        self.context.error = Some(payload);
    }

    /// Write the closing summary line at a level picked by the tracker flags.
    pub(crate) fn summary(&mut self, location: SourceLocation, text: &str) {
        let level = if self.context.has_error {
            Level::Error
        } else if self.context.has_warning {
            Level::Warn
        } else {
            Level::Info
        };
        self.session.log_at(level, location, text);
    }

    /// Console-only line, not buffered.
    pub(crate) fn console(&self, level: Level, message: &str) {
        self.dispatch.mirror(level, message);
    }

    /// Render `value` in the formats configured for `path`.
    ///
    /// Returns the structured and text renderings; the text one is also
    /// mirrored to the console at DEBUG under `label`.
    pub(crate) fn capture(
        &self,
        path: &str,
        label: &str,
        value: Value,
    ) -> (Option<Value>, Option<String>) {
        let formats = self.settings.formats_for(path);
        let text = serde_json::to_string(&value).unwrap_or_default();
        self.console(Level::Debug, &format!("{}: {}", label, text));
        (
            formats.json.then_some(value),
            formats.text.then_some(text),
        )
    }

    // ---- sessions ---------------------------------------------------------

    /// Start a detached session that persists its own light record.
    ///
    /// `tracker.new_session(false).info("...")` writes and flushes a
    /// one-line record without touching the root session.
    pub fn new_session(&self, catch_exc: bool) -> Session {
        self.session.fork(catch_exc)
    }

    /// Run `f` inside a fresh detached session.
    ///
    /// The session is flushed when `f` returns. An `Err` is recorded on the
    /// session (WARN) and suppressed when `catch_exc` is set, otherwise
    /// returned unchanged. The tracker context is not touched.
    #[track_caller]
    pub fn scope<T, E, F>(&self, catch_exc: bool, f: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&mut Session) -> Result<T, E>,
        E: StdError,
    {
        let mut session = self.new_session(catch_exc);
        let result = f(&mut session);
        session.finish(result)
    }

    // ---- persistence ------------------------------------------------------

    /// Persist the context-bearing record and conclude the tracker.
    ///
    /// Emits even when the root session is empty. Never fails; returns the
    /// number of writers that accepted the record.
    pub fn persistent(mut self) -> usize {
        self.persist_root()
    }

    fn persist_root(&mut self) -> usize {
        if self.persisted {
            return 0;
        }
        self.persisted = true;

        match panic::catch_unwind(AssertUnwindSafe(|| self.context_record())) {
            Ok(record) => self.dispatch.emit(record),
            Err(_) => {
                error!(
                    target: SYSTEM_TARGET,
                    tracker = %self.dispatch.name,
                    trace_id = %self.dispatch.trace_id,
                    "Failed to render tracker record"
                );
                0
            }
        }
    }

    /// Assemble the summary record from the root session and the context.
    fn context_record(&mut self) -> Record {
        let message = self.session.take_message();
        let mut record = self.dispatch.envelope(true, message, self.created_at);
        record.level = self.context.level;
        record.has_error = self.context.has_error;
        record.has_warning = self.context.has_warning;
        record.error = self
            .context
            .error
            .clone()
            .or_else(|| self.session.error_payload().cloned());

        let mut fields = self.domain.context();
        fields.insert(
            "attrs".to_string(),
            Value::Object(self.context.attrs.clone()),
        );
        record.fields = fields;
        record
    }
}

impl<D: Domain> Drop for Tracker<D> {
    fn drop(&mut self) {
        self.persist_root();
    }
}

impl<D: Domain> std::fmt::Debug for Tracker<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("type", &D::RECORD_TYPE)
            .field("name", &self.dispatch.name)
            .field("trace_id", &self.dispatch.trace_id)
            .field("context", &self.context)
            .field("persisted", &self.persisted)
            .finish()
    }
}

/// Serialize a domain struct into a map, empty on failure.
pub(crate) fn to_map<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
