//! The structured record persisted to writers, and record filters.

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::level::Level;
use crate::payload::ErrorPayload;

/// Timestamp layout of `@timestamp`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%z";

/// One persisted unit of tracking output.
///
/// The envelope fields are a contract for log ingestion. Domain sub-maps
/// (`http`, `request`, `task`, `execution`, ...) live in `fields`, flattened
/// into the top level when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "@version")]
    pub version: String,
    /// `HTTPTracker` or `TaskTracker`.
    #[serde(rename = "type")]
    pub record_type: String,
    pub logger_name: String,
    pub trace_id: String,
    pub thread_name: String,
    pub hostname: String,
    pub host_ip: String,
    /// True only for the single context-bearing summary record of a unit of work.
    pub with_context: bool,
    /// Flushed session lines joined by newline.
    pub message: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    pub level: Level,
    pub has_error: bool,
    pub has_warning: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Domain or extra field by key.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Nested field by dotted path, e.g. `http.status_code`.
    pub fn path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        parts.try_fold(self.fields.get(first)?, |value, key| value.get(key))
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Render a timestamp in the `@timestamp` layout.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Name of the current thread, as written to `thread_name`.
pub fn current_thread_name() -> String {
    std::thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?}", std::thread::current().id()))
}

/// Host identity written to every record. Resolved once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub hostname: String,
    pub host_ip: String,
}

static HOST_INFO: Lazy<HostInfo> = Lazy::new(HostInfo::detect);

impl HostInfo {
    pub fn current() -> &'static HostInfo {
        &HOST_INFO
    }

    fn detect() -> Self {
        let hostname = std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.trim().is_empty())
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
            })
            .unwrap_or_else(|| "localhost".to_string());
        let host_ip = resolve_ipv4(&hostname).to_string();
        Self { hostname, host_ip }
    }
}

fn resolve_ipv4(hostname: &str) -> IpAddr {
    (hostname, 0)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.find(|a| a.is_ipv4()))
        .map(|a| a.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Hook applied to every record before it reaches the writers.
pub trait RecordFilter: Send + Sync {
    fn name(&self) -> &str {
        "filter"
    }

    fn apply(&self, record: &mut Record);
}

/// Adds fixed deployment fields (`app_name`, `env_name`, ...) to every record.
///
/// Fields already present on the record are left untouched.
#[derive(Debug, Clone, Default)]
pub struct StaticFields {
    fields: Map<String, Value>,
}

impl StaticFields {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl RecordFilter for StaticFields {
    fn name(&self) -> &str {
        "static_fields"
    }

    fn apply(&self, record: &mut Record) {
        for (key, value) in &self.fields {
            record
                .fields
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_record(level: Level) -> Record {
    Record {
        version: "1".to_string(),
        record_type: "TaskTracker".to_string(),
        logger_name: "task-tracker".to_string(),
        trace_id: "t1".to_string(),
        thread_name: "main".to_string(),
        hostname: "localhost".to_string(),
        host_ip: "127.0.0.1".to_string(),
        with_context: true,
        message: String::new(),
        timestamp: "2026-01-01T00:00:00.000000+0000".to_string(),
        level,
        has_error: false,
        has_warning: false,
        error: None,
        fields: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_serialized_envelope_keys() {
        let mut record = sample_record(Level::Warn);
        record
            .fields
            .insert("task".to_string(), json!({"name": "sync"}));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["@version"], "1");
        assert_eq!(json["type"], "TaskTracker");
        assert_eq!(json["level"], "WARN");
        assert_eq!(json["task"]["name"], "sync");
        assert!(json.get("error").is_none());
        assert!(json.get("fields").is_none());
    }

    #[test]
    fn test_deserialize_roundtrip_keeps_domain_fields() {
        let mut record = sample_record(Level::Error);
        record.error = Some(ErrorPayload::new("ValueError", "bad"));
        record
            .fields
            .insert("status_code".to_string(), json!(500));
        let text = record.to_json().unwrap();
        let parsed: Record = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_path_lookup() {
        let mut record = sample_record(Level::Info);
        record
            .fields
            .insert("http".to_string(), json!({"status_code": 200}));
        assert_eq!(record.path("http.status_code"), Some(&json!(200)));
        assert_eq!(record.path("http.missing"), None);
        assert_eq!(record.path("nothing"), None);
    }

    #[test]
    fn test_timestamp_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_timestamp(at), "2026-03-04T05:06:07.000000+0000");
    }

    #[test]
    fn test_static_fields_do_not_override() {
        let mut extra = Map::new();
        extra.insert("app_name".to_string(), json!("books"));
        extra.insert("status_code".to_string(), json!(0));
        let filter = StaticFields::new(extra);

        let mut record = sample_record(Level::Info);
        record
            .fields
            .insert("status_code".to_string(), json!(200));
        filter.apply(&mut record);

        assert_eq!(record.field("app_name"), Some(&json!("books")));
        assert_eq!(record.field("status_code"), Some(&json!(200)));
    }

    #[test]
    fn test_host_info_is_populated() {
        let host = HostInfo::current();
        assert!(!host.hostname.is_empty());
        assert!(host.host_ip.parse::<IpAddr>().is_ok());
    }
}
