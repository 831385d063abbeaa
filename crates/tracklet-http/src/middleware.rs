//! Request tracking middleware.
//!
//! Builds one [`HttpTracker`] per request, exposes it to handlers through the
//! [`RequestTracker`] extractor, and persists it when the response is ready.
//!
//! ```ignore
//! let state = TrackingState::new(Arc::new(TrackerFactory::from_env()?));
//! let app = Router::new()
//!     .route("/books", get(list_books))
//!     .layer(axum::middleware::from_fn_with_state(state, track_requests));
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use tracklet_core::logging::SYSTEM_TARGET;
use tracklet_core::{
    defaults, generate_id, ErrorPayload, HttpDomain, HttpRequestInfo, HttpTracker, TrackerFactory,
};

use crate::envelope::{ResponseEnvelope, TrackedError};
use crate::handle::RequestTracker;

/// What the middleware captures and how.
#[derive(Debug, Clone)]
pub struct HttpTrackingOptions {
    /// Inbound header carrying an upstream trace id.
    pub trace_header: String,
    /// Copy the trace id into the response under `trace_header`.
    pub echo_trace_header: bool,
    /// Request headers recorded with an empty value.
    pub redact_request_headers: Vec<String>,
    /// Response headers recorded with an empty value.
    pub redact_response_headers: Vec<String>,
    pub capture_request_body: bool,
    pub capture_response_body: bool,
    /// Bodies with a larger or unknown `Content-Length` are not captured.
    pub max_body_bytes: usize,
    /// Tracker to resolve instead of the configured `http_tracker`.
    pub tracker_name: Option<String>,
}

impl Default for HttpTrackingOptions {
    fn default() -> Self {
        Self {
            trace_header: defaults::HTTP_TRACE_HEADER.to_string(),
            echo_trace_header: true,
            redact_request_headers: vec!["cookie".to_string(), "authorization".to_string()],
            redact_response_headers: vec!["set-cookie".to_string()],
            capture_request_body: false,
            capture_response_body: false,
            max_body_bytes: defaults::MAX_BODY_BYTES,
            tracker_name: None,
        }
    }
}

impl HttpTrackingOptions {
    /// Defaults overridden by `TRACKLET_HTTP_*` environment variables.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(header) = std::env::var("TRACKLET_HTTP_TRACE_HEADER") {
            options.trace_header = header.to_ascii_lowercase();
        }
        if let Some(echo) = env_bool("TRACKLET_HTTP_ECHO_TRACE_HEADER") {
            options.echo_trace_header = echo;
        }
        if let Some(capture) = env_bool("TRACKLET_HTTP_CAPTURE_REQUEST_BODY") {
            options.capture_request_body = capture;
        }
        if let Some(capture) = env_bool("TRACKLET_HTTP_CAPTURE_RESPONSE_BODY") {
            options.capture_response_body = capture;
        }
        if let Some(max) = std::env::var("TRACKLET_HTTP_MAX_BODY_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            options.max_body_bytes = max;
        }
        if let Ok(name) = std::env::var("TRACKLET_HTTP_TRACKER") {
            options.tracker_name = Some(name);
        }
        options
    }

    pub fn with_tracker_name(mut self, name: impl Into<String>) -> Self {
        self.tracker_name = Some(name.into());
        self
    }

    pub fn with_request_body(mut self, capture: bool) -> Self {
        self.capture_request_body = capture;
        self
    }

    pub fn with_response_body(mut self, capture: bool) -> Self {
        self.capture_response_body = capture;
        self
    }
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| v == "true" || v == "1")
}

/// State for [`track_requests`].
#[derive(Clone)]
pub struct TrackingState {
    pub factory: Arc<TrackerFactory>,
    pub options: Arc<HttpTrackingOptions>,
}

impl TrackingState {
    pub fn new(factory: Arc<TrackerFactory>) -> Self {
        Self::with_options(factory, HttpTrackingOptions::default())
    }

    pub fn with_options(factory: Arc<TrackerFactory>, options: HttpTrackingOptions) -> Self {
        Self {
            factory,
            options: Arc::new(options),
        }
    }

    fn build_tracker(&self, trace_id: &str) -> tracklet_core::Result<HttpTracker> {
        match self.options.tracker_name.as_deref() {
            Some(name) => self.factory.tracker::<HttpDomain>(name, Some(trace_id)),
            None => self.factory.http_tracker(Some(trace_id)),
        }
    }
}

/// Header map as a JSON object, with redacted names recorded as `""`.
pub fn headers_to_value(headers: &HeaderMap, redact: &[String]) -> Value {
    let mut map = Map::new();
    for name in headers.keys() {
        let key = name.as_str();
        let value = if redact.iter().any(|r| r.eq_ignore_ascii_case(key)) {
            String::new()
        } else {
            headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ")
        };
        map.insert(key.to_string(), Value::String(value));
    }
    Value::Object(map)
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

async fn buffer_body(body: Body, limit: usize) -> Result<(String, Body), axum::Error> {
    let bytes = axum::body::to_bytes(body, limit).await?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    Ok((text, Body::from(bytes)))
}

/// Track one request from arrival to response.
///
/// Call order: request id, http info, request headers (and body), handler,
/// captured error, response envelope, response headers, http result, persist.
/// A handler panic is recorded as the request's error and resumed once the
/// record is persisted.
pub async fn track_requests(State(state): State<TrackingState>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    let options = state.options.clone();

    let request_id = generate_id();
    let trace_id = req
        .headers()
        .get(options.trace_header.as_str())
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| request_id.clone());

    let mut tracker = match state.build_tracker(&trace_id) {
        Ok(tracker) => tracker,
        Err(e) => {
            warn!(
                target: SYSTEM_TARGET,
                trace_id = %trace_id,
                error = %e,
                "Failed to build request tracker, continuing untracked"
            );
            return next.run(req).await;
        }
    };

    tracker.set_request_id(&request_id);
    tracker.set_http_info(HttpRequestInfo {
        method: req.method().to_string(),
        url: req.uri().path().to_string(),
        url_name: req
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string()),
        url_namespace: None,
        query_string: req.uri().query().map(str::to_string),
    });
    tracker.set_request_headers(headers_to_value(req.headers(), &options.redact_request_headers));

    let mut req = req;
    if options.capture_request_body
        && content_length(req.headers()).is_some_and(|len| len <= options.max_body_bytes)
    {
        let (parts, body) = req.into_parts();
        let body = match buffer_body(body, options.max_body_bytes).await {
            Ok((text, body)) => {
                tracker.set_request_body(text);
                body
            }
            Err(e) => {
                tracker.warn(format!("Request body unreadable: {}", e));
                Body::empty()
            }
        };
        req = Request::from_parts(parts, body);
    }

    let handle = RequestTracker::new(tracker);
    req.extensions_mut().insert(handle.clone());

    debug!(
        target: SYSTEM_TARGET,
        request_id = %request_id,
        trace_id = %trace_id,
        "Request tracking started"
    );

    let outcome = AssertUnwindSafe(next.run(req)).catch_unwind().await;

    // A handler may still hold a clone; the tracker itself is taken back here.
    let Some(mut tracker) = handle.take() else {
        return match outcome {
            Ok(response) => response,
            Err(panic) => std::panic::resume_unwind(panic),
        };
    };

    let mut response = match outcome {
        Ok(response) => response,
        Err(panic) => {
            tracker.set_error_payload(ErrorPayload::from_panic(&*panic));
            tracker.set_http_result(500, started.elapsed());
            tracker.persistent();
            std::panic::resume_unwind(panic);
        }
    };

    let tracked_error = response.extensions_mut().remove::<TrackedError>();
    let status = response.status();
    match tracked_error {
        Some(TrackedError(payload)) => tracker.set_error_payload(payload),
        None if status.is_server_error() => {
            tracker.warn(format!("Handler responded with {}", status));
        }
        None => {}
    }
    if let Some(ResponseEnvelope(data)) = response.extensions_mut().remove::<ResponseEnvelope>() {
        tracker.set_response_data(data);
    }

    if options.capture_response_body
        && content_length(response.headers()).is_some_and(|len| len <= options.max_body_bytes)
    {
        let (parts, body) = response.into_parts();
        let body = match buffer_body(body, options.max_body_bytes).await {
            Ok((text, body)) => {
                tracker.set_response_body(text);
                body
            }
            Err(e) => {
                tracker.warn(format!("Response body unreadable: {}", e));
                Body::empty()
            }
        };
        response = Response::from_parts(parts, body);
    }

    tracker.set_response_headers(headers_to_value(
        response.headers(),
        &options.redact_response_headers,
    ));
    tracker.set_http_result(status.as_u16(), started.elapsed());

    if options.echo_trace_header {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(options.trace_header.as_bytes()),
            HeaderValue::from_str(tracker.trace_id()),
        ) {
            response.headers_mut().insert(name, value);
        }
    }

    let accepted = tracker.persistent();
    debug!(
        target: SYSTEM_TARGET,
        request_id = %request_id,
        trace_id = %trace_id,
        accepted,
        "Request tracking finished"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_redacted_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("session=abc"));
        headers.insert("authorization", HeaderValue::from_static("Bearer x"));
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));

        let redact = vec!["Cookie".to_string(), "Authorization".to_string()];
        let value = headers_to_value(&headers, &redact);
        assert_eq!(value["cookie"], "");
        assert_eq!(value["authorization"], "");
        assert_eq!(value["accept"], "text/html, application/json");
    }

    #[test]
    fn test_default_options() {
        let options = HttpTrackingOptions::default();
        assert_eq!(options.trace_header, "h-trace-id");
        assert!(options.echo_trace_header);
        assert_eq!(options.redact_response_headers, vec!["set-cookie"]);
        assert!(!options.capture_request_body);
        assert!(options.tracker_name.is_none());
    }

    #[test]
    fn test_content_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length(&headers), None);
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("12"));
        assert_eq!(content_length(&headers), Some(12));
    }
}
