//! Bounded line buffer and line formatting.

use chrono::{DateTime, Utc};

use crate::level::Level;
use crate::location::SourceLocation;

/// Insertion-ordered, capacity-bounded buffer of formatted log lines.
///
/// Once `capacity` lines are held, further writes are dropped without error.
/// Not synchronized: a buffer belongs to exactly one session.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    lines: Vec<String>,
    capacity: usize,
    dropped: usize,
}

impl LineBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Vec::with_capacity(capacity.min(64)),
            capacity,
            dropped: 0,
        }
    }

    /// Append a line. Returns `false` if the buffer is full and the line was dropped.
    pub fn write(&mut self, line: impl Into<String>) -> bool {
        if self.lines.len() < self.capacity {
            self.lines.push(line.into());
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    /// Take all buffered lines joined by newline, leaving the buffer empty.
    pub fn flush(&mut self) -> String {
        let text = self.lines.join("\n");
        self.lines.clear();
        self.dropped = 0;
        text
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lines dropped since the last flush.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// Render one buffered line:
/// `[YYYY-mm-dd HH:MM:SS.cc] LEVEL file:module: [line:N] message`.
///
/// Surrounding newlines in `message` are trimmed.
pub fn format_line(
    at: DateTime<Utc>,
    level: Level,
    location: &SourceLocation,
    message: &str,
) -> String {
    format!(
        "[{}.{:02}] {} {} {}",
        at.format("%Y-%m-%d %H:%M:%S"),
        at.timestamp_subsec_millis() / 10,
        level,
        location,
        message.trim_matches('\n')
    )
}
