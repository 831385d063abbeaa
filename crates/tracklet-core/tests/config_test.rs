//! Integration tests for loading tracking configuration from files.

use std::io::Write;

use tracklet_core::{Error, Level, TrackerFactory, TrackingConfig, Writer};

fn write_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn test_load_yaml_file() {
    let file = write_file(
        ".yaml",
        r#"
level: DEBUG
writers:
  audit:
    class: memory
    level: ERROR
trackers:
  task-tracker:
    class: task
    writers: [audit]
    extra_fields:
      app_name: catalog
"#,
    );
    let config = TrackingConfig::from_file(file.path()).unwrap();
    assert_eq!(config.level, Level::Debug);
    assert_eq!(config.tracker("task-tracker").unwrap().writers, vec!["audit"]);
    assert!(config.tracker("http-tracker").is_ok());

    let factory = TrackerFactory::new(config);
    let writer = factory.writer("audit").unwrap();
    assert_eq!(writer.level(), Level::Error);
}

#[test]
fn test_load_json_file() {
    let file = write_file(
        ".json",
        r#"{"buffer_size": 10, "trackers": {"jobs": {"class": "task", "writers": ["console"]}}}"#,
    );
    let config = TrackingConfig::from_file(file.path()).unwrap();
    assert_eq!(config.buffer_size, 10);
    let jobs = config.tracker("jobs").unwrap();
    assert_eq!(config.settings(jobs).buffer_size, 10);
}

#[test]
fn test_invalid_level_in_file() {
    let file = write_file(".yml", "trackers:\n  t:\n    class: task\n    level: CHATTY\n");
    assert!(matches!(
        TrackingConfig::from_file(file.path()),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = TrackingConfig::from_file(dir.path().join("absent.yaml"));
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_tracker_with_unknown_writer_fails() {
    let file = write_file(
        ".yaml",
        "trackers:\n  task-tracker:\n    class: task\n    writers: [nowhere]\n",
    );
    let factory = TrackerFactory::new(TrackingConfig::from_file(file.path()).unwrap());
    assert!(matches!(
        factory.task_tracker(None),
        Err(Error::UnknownWriter(name)) if name == "nowhere"
    ));
}
