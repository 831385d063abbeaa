//! Call-site capture for log lines.

use std::fmt;
use std::panic::Location;

/// Where a log call was made.
///
/// Captured with `#[track_caller]` by the logging methods (file and line), or
/// with the [`track!`](crate::track) macro which also records the module path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
    pub module: Option<&'static str>,
}

impl SourceLocation {
    pub const fn new(file: &'static str, line: u32, module: Option<&'static str>) -> Self {
        Self { file, line, module }
    }

    /// Location of the caller of the current `#[track_caller]` function.
    #[track_caller]
    pub fn caller() -> Self {
        Location::caller().into()
    }
}

impl From<&'static Location<'static>> for SourceLocation {
    fn from(loc: &'static Location<'static>) -> Self {
        Self {
            file: loc.file(),
            line: loc.line(),
            module: None,
        }
    }
}

impl fmt::Display for SourceLocation {
    /// `file:module: [line:N]`, with `?` when the module is unknown.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: [line:{}]",
            self.file,
            self.module.unwrap_or("?"),
            self.line
        )
    }
}

/// Capture the current source location including the module path.
#[macro_export]
macro_rules! here {
    () => {
        $crate::SourceLocation::new(file!(), line!(), Some(module_path!()))
    };
}

/// Log through a tracker or session with a full source location.
///
/// ```ignore
/// track!(tracker, Level::Info, "loaded {} rows", rows);
/// ```
#[macro_export]
macro_rules! track {
    ($target:expr, $level:expr, $($arg:tt)+) => {
        $target.log_at($level, $crate::here!(), format!($($arg)+))
    };
}
