use std::io::Write as _;

use crate::config::WriterConfig;
use crate::error::Result;
use crate::level::Level;
use crate::record::Record;

use super::Writer;

/// One JSON document per record on stdout; WARN and above go to stderr.
#[derive(Debug, Clone)]
pub struct ConsoleWriter {
    name: String,
    level: Level,
    pretty: bool,
}

impl ConsoleWriter {
    pub fn new(name: impl Into<String>, level: Level) -> Self {
        Self {
            name: name.into(),
            level,
            pretty: false,
        }
    }

    /// Indent output for local development.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Params: `pretty` (bool).
    pub fn from_config(name: &str, config: &WriterConfig, level: Level) -> Self {
        Self::new(name, level).pretty(config.param_bool("pretty").unwrap_or(false))
    }

    fn render(&self, record: &Record) -> Result<String> {
        let text = if self.pretty {
            serde_json::to_string_pretty(record)?
        } else {
            serde_json::to_string(record)?
        };
        Ok(text)
    }
}

impl Writer for ConsoleWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> Level {
        self.level
    }

    fn send(&self, record: &Record) -> Result<()> {
        let text = self.render(record)?;
        if record.level >= Level::Warn {
            writeln!(std::io::stderr().lock(), "{}", text)?;
        } else {
            writeln!(std::io::stdout().lock(), "{}", text)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        std::io::stdout().flush()?;
        std::io::stderr().flush()?;
        Ok(())
    }
}
