use std::sync::{Mutex, MutexGuard};

use crate::error::Result;
use crate::level::Level;
use crate::record::Record;

use super::Writer;

/// Keeps accepted records in memory. Used to assert on tracker output.
#[derive(Debug)]
pub struct MemoryWriter {
    name: String,
    level: Level,
    records: Mutex<Vec<Record>>,
}

impl MemoryWriter {
    pub fn new(name: impl Into<String>, level: Level) -> Self {
        Self {
            name: name.into(),
            level,
            records: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the accepted records, oldest first.
    pub fn records(&self) -> Vec<Record> {
        self.lock().clone()
    }

    /// Remove and return the accepted records.
    pub fn take(&self) -> Vec<Record> {
        std::mem::take(&mut *self.lock())
    }

    /// The context-bearing records only.
    pub fn context_records(&self) -> Vec<Record> {
        self.lock()
            .iter()
            .filter(|r| r.with_context)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Writer for MemoryWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> Level {
        self.level
    }

    fn send(&self, record: &Record) -> Result<()> {
        self.lock().push(record.clone());
        Ok(())
    }
}
