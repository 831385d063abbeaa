//! Request-scoped tracker handle.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde_json::{Map, Value};
use tracklet_core::{HttpTracker, Level, Session, SourceLocation};

/// Cloneable handle to the tracker of the current request.
///
/// The middleware inserts one into the request extensions and takes the
/// tracker back out when the handler returns. Handlers extract it like any
/// other axum extractor; without the middleware every call is a no-op.
#[derive(Clone, Default)]
pub struct RequestTracker {
    inner: Arc<Mutex<Option<HttpTracker>>>,
}

impl RequestTracker {
    pub fn new(tracker: HttpTracker) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(tracker))),
        }
    }

    /// Handle with no tracker behind it.
    pub fn untracked() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<HttpTracker>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_tracked(&self) -> bool {
        self.lock().is_some()
    }

    /// Take the tracker out; later calls through other clones are no-ops.
    pub fn take(&self) -> Option<HttpTracker> {
        self.lock().take()
    }

    /// Run `f` against the tracker, if there still is one.
    pub fn with<R>(&self, f: impl FnOnce(&mut HttpTracker) -> R) -> Option<R> {
        self.lock().as_mut().map(f)
    }

    #[track_caller]
    pub fn debug(&self, message: impl AsRef<str>) -> bool {
        self.log_at(Level::Debug, SourceLocation::caller(), message)
    }

    #[track_caller]
    pub fn info(&self, message: impl AsRef<str>) -> bool {
        self.log_at(Level::Info, SourceLocation::caller(), message)
    }

    #[track_caller]
    pub fn warn(&self, message: impl AsRef<str>) -> bool {
        self.log_at(Level::Warn, SourceLocation::caller(), message)
    }

    #[track_caller]
    pub fn error(&self, message: impl AsRef<str>) -> bool {
        self.log_at(Level::Error, SourceLocation::caller(), message)
    }

    pub fn log_at(&self, level: Level, location: SourceLocation, message: impl AsRef<str>) -> bool {
        match self.lock().as_mut() {
            Some(tracker) => tracker.log_at(level, location, message),
            None => false,
        }
    }

    #[track_caller]
    pub fn exception<E>(&self, err: &E) -> bool
    where
        E: StdError + ?Sized,
    {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(tracker) => tracker.exception(err),
            None => false,
        }
    }

    pub fn set_request_params(&self, params: Value) {
        self.with(|t| t.set_request_params(params));
    }

    pub fn set_user(&self, user: Value) {
        self.with(|t| t.set_user(user));
    }

    pub fn set_operator(&self, operator: Value) {
        self.with(|t| t.set_operator(operator));
    }

    pub fn set_attr(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        self.with(|t| t.set_attr(key, value));
    }

    pub fn trace_id(&self) -> Option<String> {
        self.with(|t| t.trace_id().to_string())
    }

    /// Headers to attach to tasks scheduled on behalf of this request.
    pub fn propagation_headers(&self) -> Map<String, Value> {
        self.with(|t| t.propagation_headers()).unwrap_or_default()
    }

    /// Detached session sharing the request's trace id.
    pub fn new_session(&self, catch_exc: bool) -> Option<Session> {
        self.with(|t| t.new_session(catch_exc))
    }
}

impl std::fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTracker")
            .field("trace_id", &self.trace_id())
            .finish()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestTracker
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestTracker>()
            .cloned()
            .unwrap_or_else(RequestTracker::untracked))
    }
}
