//! # tracklet-http
//!
//! axum integration for tracklet: a middleware that tracks every request,
//! an extractor giving handlers access to the request's tracker, and the
//! JSON response envelope whose codes the tracker records.

pub mod envelope;
pub mod handle;
pub mod middleware;

pub use envelope::{ApiCode, ApiError, ApiResponse, ResponseEnvelope, TrackedError};
pub use handle::RequestTracker;
pub use middleware::{headers_to_value, track_requests, HttpTrackingOptions, TrackingState};
