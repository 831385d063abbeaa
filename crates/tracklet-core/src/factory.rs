//! Configuration-driven tracker construction.
//!
//! One [`TrackerFactory`] is built at process start and shared (`Arc`) by
//! every adapter. It is the only process-wide mutable state: writer instances
//! are cached by writer name so that building a tracker per request or task
//! reuses one transport connection per configured sink.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::config::TrackingConfig;
use crate::error::{Error, Result};
use crate::logging::SYSTEM_TARGET;
use crate::record::StaticFields;
use crate::tracker::{Domain, HttpTracker, TaskTracker, Tracker};
use crate::writer::{Writer, WriterRegistry};

pub struct TrackerFactory {
    config: TrackingConfig,
    registry: WriterRegistry,
    writers: RwLock<HashMap<String, Arc<dyn Writer>>>,
}

impl TrackerFactory {
    /// Factory with the built-in writer classes.
    pub fn new(config: TrackingConfig) -> Self {
        Self::with_registry(config, WriterRegistry::builtin())
    }

    pub fn with_registry(config: TrackingConfig, registry: WriterRegistry) -> Self {
        Self {
            config,
            registry,
            writers: RwLock::new(HashMap::new()),
        }
    }

    /// Factory over [`TrackingConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(TrackingConfig::from_env()?))
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Resolve a named writer, building it on first use.
    ///
    /// Concurrent first requests for the same name build it once.
    pub fn writer(&self, name: &str) -> Result<Arc<dyn Writer>> {
        {
            let cache = self.writers.read().unwrap_or_else(|e| e.into_inner());
            if let Some(writer) = cache.get(name) {
                return Ok(Arc::clone(writer));
            }
        }

        let mut cache = self.writers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(writer) = cache.get(name) {
            return Ok(Arc::clone(writer));
        }

        let config = self.config.writer(name)?;
        let writer = self
            .registry
            .build(name, config, self.config.writer_level(config))?;
        debug!(
            target: SYSTEM_TARGET,
            writer = name,
            class = %config.class,
            level = %writer.level(),
            "Writer created"
        );
        cache.insert(name.to_string(), Arc::clone(&writer));
        Ok(writer)
    }

    /// Install a writer instance under `name`, replacing any cached one.
    pub fn register_writer(&self, name: impl Into<String>, writer: Arc<dyn Writer>) {
        self.writers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), writer);
    }

    pub fn cached_writers(&self) -> usize {
        self.writers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Build every configured writer now. Returns how many are cached.
    pub fn preload(&self) -> Result<usize> {
        let mut names: Vec<&String> = self.config.writers.keys().collect();
        names.sort();
        for name in names {
            self.writer(name)?;
        }
        let cached = self.cached_writers();
        info!(target: SYSTEM_TARGET, writers = cached, "Tracker writers preloaded");
        Ok(cached)
    }

    /// Build the tracker configured under `name`.
    ///
    /// Fails when the name is unknown, its class does not match `D`, or one
    /// of its writers cannot be resolved.
    pub fn tracker<D: Domain>(&self, name: &str, trace_id: Option<&str>) -> Result<Tracker<D>> {
        let config = self.config.tracker(name)?;
        if !class_matches::<D>(&config.class) {
            return Err(Error::TrackerClassMismatch {
                name: name.to_string(),
                configured: config.class.clone(),
                expected: D::CLASS,
            });
        }

        let writers = config
            .writers
            .iter()
            .map(|w| self.writer(w))
            .collect::<Result<Vec<_>>>()?;

        let mut tracker =
            Tracker::<D>::with_settings(name, trace_id, self.config.settings(config))
                .with_writers(writers);
        if !config.extra_fields.is_empty() {
            tracker = tracker.with_filter(Arc::new(StaticFields::new(config.extra_fields.clone())));
        }
        debug!(
            target: SYSTEM_TARGET,
            tracker = name,
            trace_id = tracker.trace_id(),
            "Tracker created"
        );
        Ok(tracker)
    }

    /// Tracker named by `http_tracker` in the configuration.
    pub fn http_tracker(&self, trace_id: Option<&str>) -> Result<HttpTracker> {
        self.tracker(&self.config.http_tracker, trace_id)
    }

    /// Tracker named by `task_tracker` in the configuration.
    pub fn task_tracker(&self, trace_id: Option<&str>) -> Result<TaskTracker> {
        self.tracker(&self.config.task_tracker, trace_id)
    }
}

impl Default for TrackerFactory {
    fn default() -> Self {
        Self::new(TrackingConfig::default())
    }
}

fn class_matches<D: Domain>(class: &str) -> bool {
    class.eq_ignore_ascii_case(D::CLASS) || class.eq_ignore_ascii_case(D::RECORD_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TrackerConfig, WriterConfig};
    use crate::level::Level;
    use crate::tracker::{HttpDomain, TaskDomain};

    fn config() -> TrackingConfig {
        TrackingConfig::default()
            .with_writer("mem", WriterConfig::new("memory").with_level(Level::Debug))
            .with_tracker(
                "http-tracker",
                TrackerConfig::new("http").with_writers(["mem"]),
            )
            .with_tracker(
                "task-tracker",
                TrackerConfig::new("TaskTracker").with_writers(["mem"]),
            )
    }

    #[test]
    fn test_writer_is_cached_by_name() {
        let factory = TrackerFactory::new(config());
        let a = factory.writer("mem").unwrap();
        let b = factory.writer("mem").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.cached_writers(), 1);
    }

    #[test]
    fn test_concurrent_first_use_builds_once() {
        let factory = Arc::new(TrackerFactory::new(config()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let factory = Arc::clone(&factory);
                std::thread::spawn(move || factory.writer("mem").unwrap())
            })
            .collect();
        let writers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(writers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_trackers_share_writers() {
        let factory = TrackerFactory::new(config());
        let _a = factory.http_tracker(None).unwrap();
        let _b = factory.http_tracker(None).unwrap();
        let _c = factory.task_tracker(Some("t")).unwrap();
        assert_eq!(factory.cached_writers(), 1);
    }

    #[test]
    fn test_class_mismatch() {
        let factory = TrackerFactory::new(config());
        let result = factory.tracker::<TaskDomain>("http-tracker", None);
        assert!(matches!(
            result,
            Err(Error::TrackerClassMismatch { expected: "task", .. })
        ));
        assert!(factory.tracker::<HttpDomain>("http-tracker", None).is_ok());
    }

    #[test]
    fn test_unknown_names() {
        let factory = TrackerFactory::new(config());
        assert!(matches!(
            factory.tracker::<HttpDomain>("nope", None),
            Err(Error::UnknownTracker(_))
        ));
        assert!(matches!(factory.writer("nope"), Err(Error::UnknownWriter(_))));
    }

    #[test]
    fn test_preload_builds_configured_writers() {
        let config = TrackingConfig::default()
            .with_writer("queue", WriterConfig::new("memory"))
            .with_writer("mem", WriterConfig::new("memory"));
        let factory = TrackerFactory::new(config);
        assert_eq!(factory.preload().unwrap(), 3);
    }

    #[test]
    fn test_register_writer_overrides_config() {
        let factory = TrackerFactory::new(config());
        let capture = Arc::new(crate::writer::MemoryWriter::new("mem", Level::Debug));
        factory.register_writer("mem", capture.clone());
        factory.task_tracker(None).unwrap().persistent();
        assert_eq!(capture.len(), 1);
    }

    #[test]
    fn test_tracker_settings_applied() {
        let config = config().with_tracker(
            "quiet",
            TrackerConfig::new("task")
                .with_level(Level::Warn)
                .with_buffer_size(3)
                .with_extra_field("app_name", "books")
                .with_writers(["mem"]),
        );
        let factory = TrackerFactory::new(config);
        let capture = Arc::new(crate::writer::MemoryWriter::new("mem", Level::Debug));
        factory.register_writer("mem", capture.clone());

        let mut tracker = factory.tracker::<TaskDomain>("quiet", None).unwrap();
        assert!(!tracker.info("dropped by level"));
        assert_eq!(tracker.settings().buffer_size, 3);
        tracker.persistent();
        assert_eq!(
            capture.records()[0].field("app_name"),
            Some(&serde_json::json!("books"))
        );
    }
}
