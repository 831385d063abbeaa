//! Message-queue writer backed by a Redis stream.
//!
//! `send` serializes the record and enqueues it on a bounded in-process
//! channel. A dedicated publisher thread drains the channel and appends each
//! record to the stream named by the writer's topic:
//!
//! ```text
//! XADD <topic> [MAXLEN ~ <n>] * record <json>
//! ```
//!
//! ## Params
//!
//! - `url`: broker URL (default: `redis://127.0.0.1:6379`)
//! - `topic`: stream key (default: `tracker`)
//! - `maxlen`: approximate stream length cap (optional)
//! - `capacity`: in-process buffer size (default: 1024)
//! - `connect_timeout_ms`: connection timeout (default: 500)

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::config::WriterConfig;
use crate::defaults;
use crate::error::{Error, Result};
use crate::level::Level;
use crate::logging::SYSTEM_TARGET;
use crate::record::Record;

use super::Writer;

/// Transport used by [`QueueWriter`].
pub trait Producer: Send + Sync {
    /// Enqueue a serialized record without blocking.
    fn send(&self, topic: &str, payload: String) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool;
}

/// Producer that discards everything. Used when the broker is unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProducer;

impl Producer for NoopProducer {
    fn send(&self, _topic: &str, _payload: String) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        false
    }
}

/// Connection options for [`RedisProducer`].
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub url: String,
    pub topic: String,
    pub maxlen: Option<u64>,
    pub capacity: usize,
    pub connect_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            url: defaults::QUEUE_URL.to_string(),
            topic: defaults::QUEUE_TOPIC.to_string(),
            maxlen: None,
            capacity: defaults::QUEUE_CAPACITY,
            connect_timeout: Duration::from_millis(defaults::QUEUE_CONNECT_TIMEOUT_MS),
        }
    }
}

impl QueueOptions {
    pub fn from_config(config: &WriterConfig) -> Self {
        let base = Self::default();
        Self {
            url: config.param_str("url").map(str::to_string).unwrap_or(base.url),
            topic: config
                .param_str("topic")
                .map(str::to_string)
                .unwrap_or(base.topic),
            maxlen: config.param_u64("maxlen"),
            capacity: config
                .param_u64("capacity")
                .map(|c| c as usize)
                .unwrap_or(base.capacity),
            connect_timeout: config
                .param_u64("connect_timeout_ms")
                .map(Duration::from_millis)
                .unwrap_or(base.connect_timeout),
        }
    }
}

struct Outgoing {
    topic: String,
    payload: String,
}

/// Publishes to Redis streams from a background thread.
pub struct RedisProducer {
    tx: mpsc::Sender<Outgoing>,
}

impl RedisProducer {
    /// Open a connection and start the publisher thread.
    ///
    /// Fails when the URL is invalid or the broker cannot be reached within
    /// the connect timeout.
    pub fn connect(name: &str, options: &QueueOptions) -> Result<Self> {
        let client = redis::Client::open(options.url.as_str())?;
        let conn = client.get_connection_with_timeout(options.connect_timeout)?;

        let (tx, rx) = mpsc::channel(options.capacity.max(1));
        let maxlen = options.maxlen;
        let writer = name.to_string();
        std::thread::Builder::new()
            .name(format!("tracklet-queue-{}", name))
            .spawn(move || publish_loop(writer, conn, rx, maxlen))?;

        info!(
            target: SYSTEM_TARGET,
            writer = name,
            topic = %options.topic,
            url = %mask_url(&options.url),
            "Queue writer connected"
        );
        Ok(Self { tx })
    }
}

impl Producer for RedisProducer {
    fn send(&self, topic: &str, payload: String) -> Result<()> {
        let outgoing = Outgoing {
            topic: topic.to_string(),
            payload,
        };
        match self.tx.try_send(outgoing) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::QueueFull(topic.to_string())),
            Err(TrySendError::Closed(_)) => {
                Err(Error::Transport("publisher thread stopped".to_string()))
            }
        }
    }

    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

fn publish_loop(
    writer: String,
    mut conn: redis::Connection,
    mut rx: mpsc::Receiver<Outgoing>,
    maxlen: Option<u64>,
) {
    while let Some(outgoing) = rx.blocking_recv() {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&outgoing.topic);
        if let Some(n) = maxlen {
            cmd.arg("MAXLEN").arg("~").arg(n);
        }
        cmd.arg("*").arg("record").arg(&outgoing.payload);

        if let Err(e) = cmd.query::<redis::Value>(&mut conn) {
            warn!(
                target: SYSTEM_TARGET,
                writer = %writer,
                topic = %outgoing.topic,
                error = %e,
                "Queue publish failed, record dropped"
            );
        }
    }
    debug!(target: SYSTEM_TARGET, writer = %writer, "Queue publisher stopped");
}

/// Hide credentials and host details when logging a broker URL.
fn mask_url(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => format!(
            "{}://{}",
            scheme,
            rest.replace(|c: char| c.is_ascii_alphanumeric(), "*")
        ),
        None => url.replace(|c: char| c.is_ascii_alphanumeric(), "*"),
    }
}

/// Writer that produces records to a message queue topic.
pub struct QueueWriter {
    name: String,
    level: Level,
    topic: String,
    producer: Arc<dyn Producer>,
}

impl QueueWriter {
    pub fn new(
        name: impl Into<String>,
        level: Level,
        topic: impl Into<String>,
        producer: Arc<dyn Producer>,
    ) -> Self {
        Self {
            name: name.into(),
            level,
            topic: topic.into(),
            producer,
        }
    }

    /// Connect to the configured broker.
    ///
    /// An unreachable broker is logged once and the writer degrades to a
    /// no-op; tracker construction is never blocked by it.
    pub fn from_config(name: &str, config: &WriterConfig, level: Level) -> Self {
        let options = QueueOptions::from_config(config);
        let producer: Arc<dyn Producer> = match RedisProducer::connect(name, &options) {
            Ok(producer) => Arc::new(producer),
            Err(e) => {
                warn!(
                    target: SYSTEM_TARGET,
                    writer = name,
                    url = %mask_url(&options.url),
                    error = %e,
                    "Failed to connect queue writer, records will be discarded"
                );
                Arc::new(NoopProducer)
            }
        };
        Self::new(name, level, options.topic, producer)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_connected(&self) -> bool {
        self.producer.is_connected()
    }
}

impl Writer for QueueWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> Level {
        self.level
    }

    fn send(&self, record: &Record) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        self.producer.send(&self.topic, payload)
    }

    fn flush(&self) -> Result<()> {
        self.producer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::sample_record;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Captured {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Producer for Captured {
        fn send(&self, topic: &str, payload: String) -> Result<()> {
            self.sent.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    struct Saturated;

    impl Producer for Saturated {
        fn send(&self, topic: &str, _payload: String) -> Result<()> {
            Err(Error::QueueFull(topic.to_string()))
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_send_serializes_to_topic() {
        let producer = Arc::new(Captured::default());
        let writer = QueueWriter::new("queue", Level::Info, "tracker", producer.clone());
        assert!(writer.write(&sample_record(Level::Info)).unwrap());

        let sent = producer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "tracker");
        let json: serde_json::Value = serde_json::from_str(&sent[0].1).unwrap();
        assert_eq!(json["type"], "TaskTracker");
    }

    #[test]
    fn test_queue_full_is_reported() {
        let writer = QueueWriter::new("queue", Level::Info, "tracker", Arc::new(Saturated));
        let result = writer.write(&sample_record(Level::Error));
        assert!(matches!(result, Err(Error::QueueFull(t)) if t == "tracker"));
    }

    #[test]
    fn test_unreachable_broker_degrades_to_noop() {
        let config: WriterConfig = serde_yaml::from_str(
            "class: queue\nurl: redis://127.0.0.1:1\ntopic: audit\nconnect_timeout_ms: 50\n",
        )
        .unwrap();
        let writer = QueueWriter::from_config("queue", &config, Level::Info);
        assert!(!writer.is_connected());
        assert_eq!(writer.topic(), "audit");
        assert!(writer.write(&sample_record(Level::Info)).unwrap());
    }

    #[test]
    fn test_options_defaults() {
        let options = QueueOptions::from_config(&WriterConfig::new("queue"));
        assert_eq!(options.topic, defaults::QUEUE_TOPIC);
        assert_eq!(options.url, defaults::QUEUE_URL);
        assert_eq!(options.maxlen, None);
        assert_eq!(options.capacity, defaults::QUEUE_CAPACITY);
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(mask_url("redis://user:pw@host:6379"), "redis://****:**@****:****");
    }
}
