//! Record sinks.
//!
//! A writer drops records below its minimum level and hands the rest to its
//! transport. Writers are shared by every tracker built from one factory, so
//! they must be `Send + Sync` and cheap to call from any thread.

mod console;
mod memory;
mod queue;

pub use console::ConsoleWriter;
pub use memory::MemoryWriter;
pub use queue::{NoopProducer, Producer, QueueOptions, QueueWriter, RedisProducer};

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::WriterConfig;
use crate::error::{Error, Result};
use crate::level::Level;
use crate::record::Record;

pub trait Writer: Send + Sync {
    /// Configured writer name.
    fn name(&self) -> &str;

    /// Minimum level a record must have to be sent.
    fn level(&self) -> Level;

    fn is_enabled_for(&self, level: Level) -> bool {
        level >= self.level()
    }

    /// Hand a record to the transport.
    fn send(&self, record: &Record) -> Result<()>;

    /// Filter by level, then send. Returns whether the record was accepted.
    fn write(&self, record: &Record) -> Result<bool> {
        if !self.is_enabled_for(record.level) {
            return Ok(false);
        }
        self.send(record)?;
        Ok(true)
    }

    /// Push out any buffered transport state.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds a writer from its configured name and entry.
pub type WriterConstructor =
    Arc<dyn Fn(&str, &WriterConfig, Level) -> Result<Arc<dyn Writer>> + Send + Sync>;

/// Writer class name → constructor table.
///
/// `level` passed to a constructor is the entry's own level, or the
/// process-wide default when the entry names none.
#[derive(Clone)]
pub struct WriterRegistry {
    constructors: HashMap<String, WriterConstructor>,
}

impl WriterRegistry {
    /// Registry without any classes.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the built-in `console`, `queue`, and `memory` classes.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("console", |name, config, level| {
            Ok(Arc::new(ConsoleWriter::from_config(name, config, level)) as Arc<dyn Writer>)
        });
        registry.register("queue", |name, config, level| {
            Ok(Arc::new(QueueWriter::from_config(name, config, level)) as Arc<dyn Writer>)
        });
        registry.register("memory", |name, _config, level| {
            Ok(Arc::new(MemoryWriter::new(name, level)) as Arc<dyn Writer>)
        });
        registry
    }

    /// Add or replace a class.
    pub fn register<F>(&mut self, class: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&str, &WriterConfig, Level) -> Result<Arc<dyn Writer>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(class.into(), Arc::new(constructor));
        self
    }

    pub fn contains(&self, class: &str) -> bool {
        self.constructors.contains_key(class)
    }

    pub fn build(&self, name: &str, config: &WriterConfig, level: Level) -> Result<Arc<dyn Writer>> {
        let constructor = self
            .constructors
            .get(&config.class)
            .ok_or_else(|| Error::UnknownWriterClass(config.class.clone()))?;
        constructor(name, config, level)
    }
}

impl Default for WriterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
