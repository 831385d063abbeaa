//! Error types for tracklet.

use thiserror::Error;

/// Result type alias using tracklet's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tracklet operations.
///
/// These errors only ever describe failures of the tracking plumbing itself.
/// Business errors observed by a tracker are recorded, never wrapped.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// No tracker with this name is configured
    #[error("Tracker config not found: {0}")]
    UnknownTracker(String),

    /// No writer with this name is configured
    #[error("Writer config not found: {0}")]
    UnknownWriter(String),

    /// Writer class is not registered in the writer registry
    #[error("Unknown writer class: {0}")]
    UnknownWriterClass(String),

    /// Tracker is configured with a different class than the one requested
    #[error("Tracker {name} is configured as {configured}, expected {expected}")]
    TrackerClassMismatch {
        name: String,
        configured: String,
        expected: &'static str,
    },

    /// Level name could not be parsed
    #[error("Invalid level: {0}")]
    InvalidLevel(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transport (message queue) failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Transport buffer is saturated, record dropped
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Transport(e.to_string())
    }
}
