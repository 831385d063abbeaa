//! Captured error payloads (`{type, value, stack}`).

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;

use serde::{Deserialize, Serialize};

/// Error details attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Short type name of the error (`ParseIntError`, `panic`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// `Display` rendering of the error.
    pub value: String,
    /// Title line, source chain, and backtrace when captured.
    pub stack: Option<String>,
}

impl ErrorPayload {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Capture an error. The type name comes from the static type `E`.
    pub fn from_error<E>(err: &E, with_stack: bool) -> Self
    where
        E: StdError + ?Sized,
    {
        Self::from_dyn(short_type_name::<E>(), &err, with_stack)
    }

    /// Capture a type-erased error under an explicit type name.
    pub fn from_dyn(kind: &str, err: &(dyn StdError + '_), with_stack: bool) -> Self {
        let mut payload = Self::new(kind, err.to_string());
        if with_stack {
            payload.stack = Some(render_stack(&payload.title(), err));
        }
        payload
    }

    /// Capture a panic payload as returned by `catch_unwind`.
    pub fn from_panic(panic: &(dyn Any + Send)) -> Self {
        let value = if let Some(s) = panic.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        Self::new("panic", value)
    }

    /// `type: value`
    pub fn title(&self) -> String {
        format!("{}: {}", self.kind, self.value)
    }

    /// Stack lines after the title line.
    pub fn stack_lines(&self) -> impl Iterator<Item = &str> {
        self.stack
            .as_deref()
            .unwrap_or_default()
            .lines()
            .skip(1)
    }
}

/// Last path segment of a type name, without generics.
///
/// `std::num::ParseIntError` → `ParseIntError`,
/// `dyn core::error::Error + Send + Sync` → `Error`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.trim_start_matches('&').trim_start_matches("dyn ");
    let base = base.split(['<', ' ']).next().unwrap_or(base);
    base.rsplit("::").next().unwrap_or(base)
}

fn render_stack(title: &str, err: &(dyn StdError + '_)) -> String {
    let mut lines = vec![title.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("Caused by: {}", cause));
        source = cause.source();
    }

    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        lines.push("Backtrace:".to_string());
        lines.extend(backtrace.to_string().lines().map(str::to_string));
    }
    lines.join("\n")
}
