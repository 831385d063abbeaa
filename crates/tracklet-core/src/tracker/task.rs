use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::level::Level;
use crate::location::SourceLocation;

use super::{to_map, Domain, Tracker};

/// `task` sub-map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskIdentity {
    pub name: Option<String>,
    pub module: Option<String>,
    pub filename: Option<String>,
}

/// `execution` sub-map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub id: Option<String>,
    pub header: Option<Value>,
    #[serde(rename = "Header")]
    pub header_text: Option<String>,
    pub params: Option<Value>,
    #[serde(rename = "Params")]
    pub params_text: Option<String>,
    pub data: Option<Value>,
    #[serde(rename = "Data")]
    pub data_text: Option<String>,
    /// Milliseconds.
    pub duration: Option<f64>,
}

/// Context of a task execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskDomain {
    pub task: TaskIdentity,
    pub execution: ExecutionInfo,
}

impl Domain for TaskDomain {
    const CLASS: &'static str = "task";
    const RECORD_TYPE: &'static str = "TaskTracker";

    fn context(&self) -> Map<String, Value> {
        to_map(self)
    }

    fn identity(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("task".to_string(), Value::Object(to_map(&self.task)));
        map
    }
}

/// Passed to [`Tracker::set_task_info`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskInfo {
    /// Execution id.
    pub id: String,
    pub name: String,
    pub module: String,
    pub filename: String,
}

impl Tracker<TaskDomain> {
    pub fn set_task_info(&mut self, info: TaskInfo) {
        let received = format!("task {}.{} received", info.module, info.name);
        let execution = format!("Execution ID: {}", info.id);
        self.update_domain(|d| {
            d.execution.id = Some(info.id);
            d.task.name = Some(info.name);
            d.task.module = Some(info.module);
            d.task.filename = Some(info.filename);
        });
        self.console(Level::Info, &received);
        self.console(Level::Debug, &execution);
    }

    pub fn set_task_headers(&mut self, headers: Value) {
        let (json, text) = self.capture("execution.header", "TaskHeaders", headers);
        self.update_domain(|d| {
            d.execution.header = json;
            d.execution.header_text = text;
        });
    }

    pub fn set_task_params(&mut self, params: Value) {
        let (json, text) = self.capture("execution.params", "TaskParams", params);
        self.update_domain(|d| {
            d.execution.params = json;
            d.execution.params_text = text;
        });
    }

    pub fn set_task_data(&mut self, data: Value) {
        let (json, text) = self.capture("execution.data", "TaskData", data);
        self.update_domain(|d| {
            d.execution.data = json;
            d.execution.data_text = text;
        });
    }

    /// Record the duration and write the summary line `task module.name duration`.
    #[track_caller]
    pub fn set_task_result(&mut self, duration: Duration) {
        let location = SourceLocation::caller();
        let millis = duration.as_secs_f64() * 1000.0;
        self.update_domain(|d| d.execution.duration = Some(millis));

        let task = &self.domain().task;
        let text = format!(
            "task {}.{} {:.1}ms",
            task.module.as_deref().unwrap_or("-"),
            task.name.as_deref().unwrap_or("-"),
            millis
        );
        self.summary(location, &text);
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.domain().execution.id.as_deref()
    }
}
