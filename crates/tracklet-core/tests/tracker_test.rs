//! Integration tests for tracker, session, and writer behavior through the
//! public API.

use std::sync::Arc;
use std::time::Duration;

use tracklet_core::{
    track, ErrorPayload, Level, MemoryWriter, Record, SourceLocation, TaskInfo, TaskTracker,
    TrackerConfig, TrackerFactory, TrackingConfig, Writer, WriterConfig,
};

fn factory_with(buffer_size: usize, level: Level) -> (TrackerFactory, Arc<MemoryWriter>) {
    let config = TrackingConfig::default()
        .with_writer("mem", WriterConfig::new("memory"))
        .with_tracker(
            "task-tracker",
            TrackerConfig::new("task")
                .with_writers(["mem"])
                .with_buffer_size(buffer_size)
                .with_level(level),
        );
    let factory = TrackerFactory::new(config);
    let capture = Arc::new(MemoryWriter::new("mem", Level::Debug));
    factory.register_writer("mem", capture.clone());
    (factory, capture)
}

fn message_lines(record: &Record) -> Vec<&str> {
    record.message.lines().collect()
}

// =============================================================================
// BUFFER PROPERTIES
// =============================================================================

#[test]
fn test_lines_flush_in_call_order() {
    let (factory, capture) = factory_with(100, Level::Debug);
    let mut tracker = factory.task_tracker(None).unwrap();
    tracker.debug("first");
    tracker.info("second");
    tracker.warn("third");
    tracker.error("fourth");
    tracker.persistent();

    let record = &capture.records()[0];
    let lines = message_lines(record);
    assert_eq!(lines.len(), 4);
    for (line, (level, text)) in lines.iter().zip([
        ("DEBUG", "first"),
        ("INFO", "second"),
        ("WARN", "third"),
        ("ERROR", "fourth"),
    ]) {
        assert!(line.contains(&format!("] {} ", level)), "{}", line);
        assert!(line.ends_with(text));
        assert!(line.contains("tracker_test.rs"));
    }
}

#[test]
fn test_lines_beyond_buffer_size_are_dropped() {
    let (factory, capture) = factory_with(3, Level::Debug);
    let mut tracker = factory.task_tracker(None).unwrap();
    for i in 0..10 {
        tracker.info(format!("line {}", i));
    }
    tracker.persistent();

    let record = &capture.records()[0];
    let lines = message_lines(record);
    assert_eq!(lines.len(), 3);
    assert!(lines[2].ends_with("line 2"));
}

#[test]
fn test_track_macro_records_module() {
    let (factory, capture) = factory_with(10, Level::Debug);
    let mut tracker = factory.task_tracker(None).unwrap();
    track!(tracker, Level::Info, "loaded {} rows", 3);
    tracker.log_at(
        Level::Info,
        SourceLocation::new("src/jobs.rs", 10, Some("catalog::jobs")),
        "explicit",
    );
    tracker.persistent();

    let lines: Vec<String> = capture.records()[0]
        .message
        .lines()
        .map(str::to_string)
        .collect();
    assert!(lines[0].contains("tracker_test: [line:"));
    assert!(lines[0].ends_with("loaded 3 rows"));
    assert!(lines[1].contains("src/jobs.rs:catalog::jobs: [line:10] explicit"));
}

// =============================================================================
// SEVERITY PROPERTIES
// =============================================================================

#[test]
fn test_ratchet_is_monotonic() {
    let (factory, _capture) = factory_with(10, Level::Debug);
    let tracker = factory.task_tracker(None).unwrap();
    let mut session = tracker.new_session(false);
    session.set_error_payload(ErrorPayload::new("Fatal", "stop"));
    for _ in 0..3 {
        session.info("info");
        session.debug("debug");
    }
    assert_eq!(session.level(), Level::Error);
}

#[test]
fn test_set_error_twice_and_independent_of_error_calls() {
    let (factory, capture) = factory_with(10, Level::Debug);
    let mut tracker = factory.task_tracker(None).unwrap();
    tracker.error("observed");
    let err = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
    tracker.exception(&err);
    assert!(!tracker.has_error());

    tracker.set_error_payload(ErrorPayload::new("First", "a"));
    tracker.set_error(&err);
    assert!(tracker.has_error());
    tracker.persistent();

    let record = &capture.records()[0];
    assert!(record.has_error);
    assert!(record.has_warning);
    assert_eq!(record.level, Level::Error);
    let error = record.error.as_ref().unwrap();
    assert_eq!(error.kind, "Error");
    assert_eq!(error.value, "disk gone");
}

#[derive(Debug)]
struct ShelfError(std::io::Error);

impl std::fmt::Display for ShelfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shelf unavailable")
    }
}

impl std::error::Error for ShelfError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

#[test]
fn test_exception_stack_lines_are_optional() {
    let (factory, capture) = factory_with(10, Level::Debug);
    let mut tracker = factory.task_tracker(None).unwrap();
    let err = ShelfError(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
    assert!(tracker.exception_with(&err, false));
    assert!(tracker.exception(&err));
    assert!(!tracker.has_error());
    assert_eq!(tracker.level(), Level::Warn);
    tracker.persistent();

    let record = &capture.records()[0];
    let lines = message_lines(record);
    assert!(lines[0].ends_with("ShelfError: shelf unavailable"));
    assert!(lines[1].ends_with("ShelfError: shelf unavailable"));
    assert_eq!(lines[2], "Caused by: disk gone");
    // The first observed payload is kept, without a stack.
    assert!(record.error.as_ref().unwrap().stack.is_none());
}

#[test]
fn test_min_level_gate_returns_false() {
    let (factory, capture) = factory_with(10, Level::Warn);
    let mut tracker = factory.task_tracker(None).unwrap();
    assert!(!tracker.debug("nope"));
    assert!(!tracker.info("nope"));
    assert!(tracker.warn("yes"));
    tracker.persistent();
    assert_eq!(message_lines(&capture.records()[0]).len(), 1);
}

// =============================================================================
// FLUSH PROPERTIES
// =============================================================================

#[test]
fn test_empty_detached_session_emits_nothing() {
    let (factory, capture) = factory_with(10, Level::Debug);
    let tracker = factory.task_tracker(None).unwrap();
    let mut session = tracker.new_session(false);
    assert!(!session.persistent());
    assert!(!session.close());
    assert!(capture.is_empty());
}

#[test]
fn test_root_flush_emits_even_when_empty() {
    let (factory, capture) = factory_with(10, Level::Debug);
    factory.task_tracker(None).unwrap().persistent();
    let records = capture.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].with_context);
    assert_eq!(records[0].message, "");
}

#[test]
fn test_context_record_is_last_and_only() {
    let (factory, capture) = factory_with(10, Level::Debug);
    let mut tracker = factory.task_tracker(None).unwrap();
    tracker.info("root");
    tracker.new_session(false).info("one");
    tracker.new_session(false).warn("two");
    tracker.persistent();

    let records = capture.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records.iter().filter(|r| r.with_context).count(), 1);
    assert!(records[2].with_context);
}

#[test]
fn test_session_panicking_scope_still_flushes() {
    let (factory, capture) = factory_with(10, Level::Debug);
    let tracker = factory.task_tracker(None).unwrap();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = tracker.scope(false, |session| {
            session.info("before crash");
            if session.len() == 1 {
                panic!("crash");
            }
            Ok::<_, std::io::Error>(())
        });
    }));
    assert!(outcome.is_err());
    let records = capture.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.message.contains("before crash"));
    assert!(record.message.contains("panic: panicked while session was open"));
    assert_eq!(record.level, Level::Warn);
    assert!(record.has_warning);
    assert!(!record.has_error);
    assert_eq!(record.error.as_ref().unwrap().kind, "panic");
}

// =============================================================================
// WRITER PROPERTIES
// =============================================================================

#[test]
fn test_warn_writer_drops_info_accepts_error() {
    let capture = Arc::new(MemoryWriter::new("strict", Level::Warn));
    let mut quiet = TaskTracker::new("t", None).with_writer(capture.clone());
    quiet.info("x");
    assert_eq!(quiet.persistent(), 0);
    assert!(capture.is_empty());

    let mut failing = TaskTracker::new("t", None).with_writer(capture.clone());
    failing.set_error_payload(ErrorPayload::new("Fatal", "x"));
    assert_eq!(failing.persistent(), 1);
    assert_eq!(capture.len(), 1);
    assert!(capture.is_enabled_for(Level::Error));
    assert!(!capture.is_enabled_for(Level::Info));
}

struct Exploding;

impl Writer for Exploding {
    fn name(&self) -> &str {
        "exploding"
    }

    fn level(&self) -> Level {
        Level::Debug
    }

    fn send(&self, _record: &Record) -> tracklet_core::Result<()> {
        Err(tracklet_core::Error::Transport("broker down".to_string()))
    }
}

struct Panicking;

impl Writer for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    fn level(&self) -> Level {
        Level::Debug
    }

    fn send(&self, _record: &Record) -> tracklet_core::Result<()> {
        panic!("writer bug")
    }
}

#[test]
fn test_writer_failures_never_propagate() {
    let capture = Arc::new(MemoryWriter::new("mem", Level::Debug));
    let mut tracker = TaskTracker::new("task-tracker", None)
        .with_writer(Arc::new(Exploding))
        .with_writer(Arc::new(Panicking))
        .with_writer(capture.clone());
    tracker.set_task_info(TaskInfo {
        id: "e1".into(),
        name: "n".into(),
        module: "m".into(),
        filename: "f.rs".into(),
    });
    tracker.set_task_result(Duration::from_millis(5));
    assert_eq!(tracker.persistent(), 1);
    assert_eq!(capture.len(), 1);
}
