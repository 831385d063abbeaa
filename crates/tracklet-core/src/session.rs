//! Sessions: one block of buffered output plus its computed severity.
//!
//! A tracker owns one root session whose lines end up in the context-bearing
//! summary record. Every other session is *detached*: it is forked from the
//! tracker, carries a snapshot of the tracker's identifying fields, and
//! persists its own light record when flushed, closed, or dropped.

use std::error::Error as StdError;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::buffer::{format_line, LineBuffer};
use crate::dispatch::Dispatch;
use crate::level::Level;
use crate::location::SourceLocation;
use crate::payload::ErrorPayload;

pub struct Session {
    created_at: DateTime<Utc>,
    buffer: LineBuffer,
    min_level: Level,
    level: Level,
    has_error: bool,
    has_warning: bool,
    error: Option<ErrorPayload>,
    with_context: bool,
    catch_exc: bool,
    dispatch: Arc<Dispatch>,
    identity: Map<String, Value>,
}

impl Session {
    pub(crate) fn new(
        dispatch: Arc<Dispatch>,
        identity: Map<String, Value>,
        min_level: Level,
        capacity: usize,
        with_context: bool,
        catch_exc: bool,
    ) -> Self {
        Self {
            created_at: Utc::now(),
            buffer: LineBuffer::new(capacity),
            min_level,
            level: Level::Debug,
            has_error: false,
            has_warning: false,
            error: None,
            with_context,
            catch_exc,
            dispatch,
            identity,
        }
    }

    /// Start an independent detached session with the same tracker, level
    /// gate, and buffer size. It never carries the tracker context.
    pub fn fork(&self, catch_exc: bool) -> Session {
        Session::new(
            Arc::clone(&self.dispatch),
            self.identity.clone(),
            self.min_level,
            self.buffer.capacity(),
            false,
            catch_exc,
        )
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

    /// Write one line at `level` with an explicit source location.
    ///
    /// Returns `false` when `level` is below the session's minimum level.
    /// `error` lines are observed errors: they ratchet severity to WARN and
    /// never set `has_error`.
    pub fn log_at(
        &mut self,
        level: Level,
        location: SourceLocation,
        message: impl AsRef<str>,
    ) -> bool {
        let message = message.as_ref();
        if level < self.min_level {
            return false;
        }
        self.buffer
            .write(format_line(Utc::now(), level, &location, message));
        self.dispatch.mirror(level, message);

        match level {
            Level::Debug => {}
            Level::Info => self.raise(Level::Info),
            Level::Warn | Level::Error => {
                self.has_warning = true;
                self.raise(Level::Warn);
            }
        }
        true
    }

    /// Record an observed error: title line at ERROR, then its stack lines.
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

    /// Record an observed error from a prepared payload.
    ///
    /// The payload becomes the session error only if none is set yet.
    #[track_caller]
    pub fn exception_payload(&mut self, payload: ErrorPayload) -> bool {
        if !self.log_at(Level::Error, SourceLocation::caller(), payload.title()) {
            return false;
        }
        for line in payload.stack_lines() {
            self.buffer.write(line);
        }
        if let Some(stack) = payload.stack.as_deref() {
            self.dispatch.mirror(Level::Debug, stack);
        }
        if self.error.is_none() {
            self.error = Some(payload);
        }
        true
    }

    /// Mark this session as failed. Overwrites any previous payload.
    pub fn set_error<E>(&mut self, err: &E)
    where
        E: StdError + ?Sized,
    {
        self.set_error_payload(ErrorPayload::from_error(err, true));
    }

    pub fn set_error_payload(&mut self, payload: ErrorPayload) {
        self.level = Level::Error;
        self.has_error = true;
        self.dispatch.mirror(Level::Error, &payload.title());
        self.error = Some(payload);
    }

    fn raise(&mut self, level: Level) {
        if self.level < level {
            self.level = level;
        }
    }

    // ---- lifecycle --------------------------------------------------------

    /// Flush a detached session's buffered lines as one light record.
    ///
    /// No-op for an empty buffer and for the root session, whose lines are
    /// persisted by its tracker. Returns whether a record was emitted.
    pub fn persistent(&mut self) -> bool {
        if self.with_context || self.buffer.is_empty() {
            return false;
        }
        let record = self.light_record();
        self.dispatch.emit(record);
        true
    }

    /// Flush and discard the session.
    pub fn close(mut self) -> bool {
        self.persistent()
    }

    /// Conclude a scoped block of work.
    ///
    /// An `Err` is recorded as an observed error (severity WARN, payload
    /// kept), the session is flushed either way, and the error is suppressed
    /// (`Ok(None)`) when the session was opened with `catch_exc`, otherwise
    /// returned unchanged.
    #[track_caller]
    pub fn finish<T, E>(self, result: Result<T, E>) -> Result<Option<T>, E>
    where
        E: StdError,
    {
        self.finish_with(result, |e| ErrorPayload::from_error(e, true))
    }

    /// [`finish`](Self::finish) for errors that are not `std::error::Error`.
    #[track_caller]
    pub fn finish_with<T, E, F>(mut self, result: Result<T, E>, payload: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&E) -> ErrorPayload,
    {
        match result {
            Ok(value) => {
                self.persistent();
                Ok(Some(value))
            }
            Err(e) => {
                self.exception_payload(payload(&e));
                self.persistent();
                if self.catch_exc {
                    Ok(None)
                } else {
                    Err(e)
                }
            }
        }
    }

    fn light_record(&mut self) -> crate::record::Record {
        let message = self.buffer.flush();
        let mut record = self.dispatch.envelope(false, message, self.created_at);
        record.level = self.level;
        record.has_error = self.has_error;
        record.has_warning = self.has_warning;
        record.error = self.error.clone();
        record.fields = self.identity.clone();
        record
    }

    // ---- crate internals --------------------------------------------------

    pub(crate) fn take_message(&mut self) -> String {
        self.buffer.flush()
    }

    pub(crate) fn set_dispatch(&mut self, dispatch: Arc<Dispatch>) {
        self.dispatch = dispatch;
    }

    pub(crate) fn set_identity(&mut self, identity: Map<String, Value>) {
        self.identity = identity;
    }

    // ---- accessors --------------------------------------------------------

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Computed severity. Starts at DEBUG and never decreases.
    pub fn level(&self) -> Level {
        self.level
    }

    pub fn min_level(&self) -> Level {
        self.min_level
    }

    pub fn has_error(&self) -> bool {
        self.has_error
    }

    pub fn has_warning(&self) -> bool {
        self.has_warning
    }

    pub fn error_payload(&self) -> Option<&ErrorPayload> {
        self.error.as_ref()
    }

    pub fn with_context(&self) -> bool {
        self.with_context
    }

    pub fn catch_exc(&self) -> bool {
        self.catch_exc
    }

    pub fn trace_id(&self) -> &str {
        &self.dispatch.trace_id
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        self.buffer.lines()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Unwinding through an open scope counts as an observed failure.
        if std::thread::panicking() && !self.with_context && !self.buffer.is_empty() {
            self.exception_payload(ErrorPayload::new("panic", "panicked while session was open"));
        }
        self.persistent();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("logger_name", &self.dispatch.name)
            .field("trace_id", &self.dispatch.trace_id)
            .field("with_context", &self.with_context)
            .field("level", &self.level)
            .field("has_error", &self.has_error)
            .field("has_warning", &self.has_warning)
            .field("lines", &self.buffer.len())
            .finish()
    }
}
