//! Tracker and writer configuration.
//!
//! ## Example (YAML)
//!
//! ```yaml
//! level: INFO
//! buffer_size: 500
//! writers:
//!   queue:
//!     class: queue
//!     level: WARN
//!     topic: tracker
//!     url: redis://queue.internal:6379
//! trackers:
//!   http-tracker:
//!     class: http
//!     writers: [console, queue]
//!     formats:
//!       request.params: [json]
//!     extra_fields:
//!       app_name: books
//! ```
//!
//! A loaded configuration is merged over the built-in defaults: entries in
//! `writers` and `trackers` replace the built-in entry of the same name.
//!
//! ## Environment
//!
//! - `TRACKLET_CONFIG`: YAML or JSON (`.json`) file to load
//! - `TRACKLET_LEVEL`: overrides `level`
//! - `TRACKLET_BUFFER_SIZE`: overrides `buffer_size`

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::defaults;
use crate::error::{Error, Result};
use crate::level::Level;

/// Which renderings of a captured JSON value a tracker keeps.
///
/// `json` stores the structured value under the lower-case key (`params`),
/// `text` stores its serialized string under the capitalized key (`Params`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Formats {
    pub json: bool,
    pub text: bool,
}

impl Formats {
    pub const BOTH: Formats = Formats {
        json: true,
        text: true,
    };
    pub const JSON: Formats = Formats {
        json: true,
        text: false,
    };
    pub const TEXT: Formats = Formats {
        json: false,
        text: true,
    };

    pub fn from_kinds(kinds: &[CaptureFormat]) -> Self {
        Self {
            json: kinds.contains(&CaptureFormat::Json),
            text: kinds.contains(&CaptureFormat::Text),
        }
    }
}

impl Default for Formats {
    fn default() -> Self {
        Self::BOTH
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    Json,
    Text,
}

/// One named writer entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Registered writer class (`console`, `queue`, `memory`, ...).
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    /// Transport-specific parameters.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl WriterConfig {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            level: None,
            params: Map::new(),
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Integer parameter. Numeric strings are accepted.
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        match self.params.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean parameter. `"true"`/`"1"` strings are accepted.
    pub fn param_bool(&self, key: &str) -> Option<bool> {
        match self.params.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => Some(s == "true" || s == "1"),
            _ => None,
        }
    }
}

/// One named tracker entry. Absent keys fall back to the process-wide defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// `http` or `task`.
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<String>,
    #[serde(default)]
    pub writers: Vec<String>,
    /// Capture formats keyed by field path (`request.params`, `execution.data`, ...).
    #[serde(default)]
    pub formats: HashMap<String, Vec<CaptureFormat>>,
    /// Fields added to every record of this tracker.
    #[serde(default)]
    pub extra_fields: Map<String, Value>,
}

impl TrackerConfig {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            level: None,
            buffer_size: None,
            console: None,
            writers: Vec::new(),
            formats: HashMap::new(),
            extra_fields: Map::new(),
        }
    }

    pub fn with_writers<I, S>(mut self, writers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writers = writers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    pub fn with_extra_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_fields.insert(key.into(), value.into());
        self
    }
}

fn default_level() -> Level {
    defaults::LEVEL
}

fn default_buffer_size() -> usize {
    defaults::BUFFER_SIZE
}

fn default_console() -> String {
    defaults::CONSOLE.to_string()
}

fn default_http_tracker() -> String {
    defaults::HTTP_TRACKER.to_string()
}

fn default_task_tracker() -> String {
    defaults::TASK_TRACKER.to_string()
}

/// Process-wide tracking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_level")]
    pub level: Level,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_console")]
    pub console: String,
    /// Tracker used by the HTTP adapter.
    #[serde(default = "default_http_tracker")]
    pub http_tracker: String,
    /// Tracker used by the task adapter.
    #[serde(default = "default_task_tracker")]
    pub task_tracker: String,
    #[serde(default)]
    pub writers: HashMap<String, WriterConfig>,
    #[serde(default)]
    pub trackers: HashMap<String, TrackerConfig>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        let mut writers = HashMap::new();
        writers.insert("console".to_string(), WriterConfig::new("console"));
        writers.insert(
            "queue".to_string(),
            WriterConfig::new("queue")
                .with_param("topic", defaults::QUEUE_TOPIC)
                .with_param("url", defaults::QUEUE_URL),
        );

        let mut trackers = HashMap::new();
        trackers.insert(
            defaults::HTTP_TRACKER.to_string(),
            TrackerConfig::new("http").with_writers(["console"]),
        );
        trackers.insert(
            defaults::TASK_TRACKER.to_string(),
            TrackerConfig::new("task").with_writers(["console"]),
        );

        Self {
            level: default_level(),
            buffer_size: default_buffer_size(),
            console: default_console(),
            http_tracker: default_http_tracker(),
            task_tracker: default_task_tracker(),
            writers,
            trackers,
        }
    }
}

impl TrackingConfig {
    /// Built-in defaults with `overrides` applied on top.
    pub fn merged(overrides: TrackingConfig) -> Self {
        let mut config = Self::default();
        config.level = overrides.level;
        config.buffer_size = overrides.buffer_size;
        config.console = overrides.console;
        config.http_tracker = overrides.http_tracker;
        config.task_tracker = overrides.task_tracker;
        config.writers.extend(overrides.writers);
        config.trackers.extend(overrides.trackers);
        config
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let parsed: TrackingConfig = serde_yaml::from_str(text)?;
        Ok(Self::merged(parsed))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let parsed: TrackingConfig =
            serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self::merged(parsed))
    }

    /// Load a file; `.json` is parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        }
    }

    /// Load from `.env`, `TRACKLET_CONFIG`, and the override variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var("TRACKLET_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };

        if let Ok(level) = std::env::var("TRACKLET_LEVEL") {
            config.level = level
                .parse()
                .map_err(|_| Error::Config(format!("TRACKLET_LEVEL: invalid level {}", level)))?;
        }
        if let Ok(size) = std::env::var("TRACKLET_BUFFER_SIZE") {
            config.buffer_size = size.trim().parse().map_err(|_| {
                Error::Config(format!("TRACKLET_BUFFER_SIZE: not a number: {}", size))
            })?;
        }
        Ok(config)
    }

    pub fn tracker(&self, name: &str) -> Result<&TrackerConfig> {
        self.trackers
            .get(name)
            .ok_or_else(|| Error::UnknownTracker(name.to_string()))
    }

    pub fn writer(&self, name: &str) -> Result<&WriterConfig> {
        self.writers
            .get(name)
            .ok_or_else(|| Error::UnknownWriter(name.to_string()))
    }

    /// Add or replace a writer entry.
    pub fn with_writer(mut self, name: impl Into<String>, writer: WriterConfig) -> Self {
        self.writers.insert(name.into(), writer);
        self
    }

    /// Add or replace a tracker entry.
    pub fn with_tracker(mut self, name: impl Into<String>, tracker: TrackerConfig) -> Self {
        self.trackers.insert(name.into(), tracker);
        self
    }

    /// Effective settings of a tracker entry.
    pub fn settings(&self, tracker: &TrackerConfig) -> TrackerSettings {
        TrackerSettings {
            level: tracker.level.unwrap_or(self.level),
            buffer_size: tracker.buffer_size.unwrap_or(self.buffer_size),
            console: tracker
                .console
                .clone()
                .unwrap_or_else(|| self.console.clone()),
            formats: tracker
                .formats
                .iter()
                .map(|(path, kinds)| (path.clone(), Formats::from_kinds(kinds)))
                .collect(),
        }
    }

    /// Effective minimum level of a writer entry.
    pub fn writer_level(&self, writer: &WriterConfig) -> Level {
        writer.level.unwrap_or(self.level)
    }
}

/// Resolved per-tracker settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    /// Minimum level of session writes.
    pub level: Level,
    pub buffer_size: usize,
    /// Name reported by mirrored console lines.
    pub console: String,
    pub formats: HashMap<String, Formats>,
}

impl TrackerSettings {
    /// Formats for a field path, both when unconfigured.
    pub fn formats_for(&self, path: &str) -> Formats {
        self.formats.get(path).copied().unwrap_or_default()
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            level: defaults::LEVEL,
            buffer_size: defaults::BUFFER_SIZE,
            console: defaults::CONSOLE.to_string(),
            formats: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_defaults() {
        let config = TrackingConfig::default();
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.buffer_size, 1000);
        assert_eq!(config.tracker("http-tracker").unwrap().class, "http");
        assert_eq!(config.tracker("task-tracker").unwrap().writers, vec!["console"]);
        assert_eq!(config.writer("queue").unwrap().param_str("topic"), Some("tracker"));
    }

    #[test]
    fn test_yaml_merges_over_defaults() {
        let config = TrackingConfig::from_yaml_str(
            r#"
level: WARNING
writers:
  audit:
    class: memory
    level: ERROR
trackers:
  http-tracker:
    class: http
    buffer_size: 5
    writers: [console, audit]
"#,
        )
        .unwrap();
        assert_eq!(config.level, Level::Warn);
        assert!(config.writers.contains_key("console"));
        assert_eq!(config.writer("audit").unwrap().level, Some(Level::Error));
        let http = config.tracker("http-tracker").unwrap();
        assert_eq!(http.writers, vec!["console", "audit"]);
        assert!(config.trackers.contains_key("task-tracker"));

        let settings = config.settings(http);
        assert_eq!(settings.buffer_size, 5);
        assert_eq!(settings.level, Level::Warn);
        assert_eq!(settings.console, "tracklet");
    }

    #[test]
    fn test_unknown_level_is_config_error() {
        let result = TrackingConfig::from_yaml_str("level: LOUD\n");
        assert!(matches!(result, Err(Error::Config(_))));
        let result = TrackingConfig::from_json_str(r#"{"level": "LOUD"}"#);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_formats_resolution() {
        let config = TrackingConfig::from_yaml_str(
            r#"
trackers:
  task-tracker:
    class: task
    formats:
      execution.params: [text]
      execution.data: [json, text]
"#,
        )
        .unwrap();
        let settings = config.settings(config.tracker("task-tracker").unwrap());
        assert_eq!(settings.formats_for("execution.params"), Formats::TEXT);
        assert_eq!(settings.formats_for("execution.data"), Formats::BOTH);
        assert_eq!(settings.formats_for("execution.header"), Formats::BOTH);
    }

    #[test]
    fn test_writer_params() {
        let writer: WriterConfig = serde_yaml::from_str(
            "class: queue\nmaxlen: \"100\"\ncapacity: 8\npretty: true\n",
        )
        .unwrap();
        assert_eq!(writer.param_u64("maxlen"), Some(100));
        assert_eq!(writer.param_u64("capacity"), Some(8));
        assert_eq!(writer.param_bool("pretty"), Some(true));
        assert_eq!(writer.param_str("missing"), None);
    }

    #[test]
    fn test_writer_level_fallback() {
        let config = TrackingConfig::default();
        let console = config.writer("console").unwrap();
        assert_eq!(config.writer_level(console), Level::Info);
        let strict = WriterConfig::new("console").with_level(Level::Error);
        assert_eq!(config.writer_level(&strict), Level::Error);
    }

    #[test]
    fn test_unknown_entries() {
        let config = TrackingConfig::default();
        assert!(matches!(config.tracker("nope"), Err(Error::UnknownTracker(_))));
        assert!(matches!(config.writer("nope"), Err(Error::UnknownWriter(_))));
    }
}
