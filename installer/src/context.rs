//! Run-scoped state threaded through every installer component.
//!
//! [`RunContext`] carries the resolved options and the accumulated
//! [`RunLog`]. The log is written to the user as the run progresses and is
//! later attached to the telemetry payload.

use crate::extension::Extension;
use crate::platform::Platform;
use camino::Utf8PathBuf;
use chrono::{DateTime, Local};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::time::Duration;

/// Severity tag attached to each log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Progress information.
    Info,
    /// A step completed successfully.
    Success,
    /// Something looks wrong but the run continues.
    Warn,
    /// A step failed.
    Error,
}

impl Severity {
    /// Bracketed label used in rendered lines.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Info => "[INFO]",
            Self::Success => "[SUCCESS]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        }
    }
}

/// A single recorded log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Local time the entry was recorded.
    pub timestamp: DateTime<Local>,
    /// Severity of the entry.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.severity.label(),
            self.message
        )
    }
}

/// Accumulating, optionally echoing log for a single run.
pub struct RunLog {
    entries: Vec<LogEntry>,
    sink: Option<Box<dyn Write>>,
    color: bool,
}

impl fmt::Debug for RunLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLog")
            .field("entries", &self.entries)
            .field("echo", &self.sink.is_some())
            .field("color", &self.color)
            .finish()
    }
}

impl RunLog {
    /// Creates a log that echoes every entry to `sink`.
    #[must_use]
    pub fn new(sink: Box<dyn Write>, color: bool) -> Self {
        Self {
            entries: Vec::new(),
            sink: Some(sink),
            color,
        }
    }

    /// Creates a log that only records entries.
    #[must_use]
    pub fn silent() -> Self {
        Self {
            entries: Vec::new(),
            sink: None,
            color: false,
        }
    }

    /// Records a message at the given severity.
    pub fn record(&mut self, severity: Severity, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            severity,
            message: message.into(),
        };

        match severity {
            Severity::Info | Severity::Success => log::info!("{}", entry.message),
            Severity::Warn => log::warn!("{}", entry.message),
            Severity::Error => log::error!("{}", entry.message),
        }

        if let Some(sink) = self.sink.as_mut() {
            let line = entry.to_string();
            let written = if self.color {
                writeln!(sink, "{}", colorize(severity, &line))
            } else {
                writeln!(sink, "{line}")
            };
            if written.is_err() {
                // Best-effort echo; the entry is still recorded.
            }
        }

        self.entries.push(entry);
    }

    /// Records an informational message.
    pub fn info(&mut self, message: impl Into<String>) {
        self.record(Severity::Info, message);
    }

    /// Records a success message.
    pub fn success(&mut self, message: impl Into<String>) {
        self.record(Severity::Success, message);
    }

    /// Records a warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.record(Severity::Warn, message);
    }

    /// Records an error.
    pub fn error(&mut self, message: impl Into<String>) {
        self.record(Severity::Error, message);
    }

    /// All entries recorded so far.
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Rendered lines, as attached to telemetry.
    #[must_use]
    pub fn rendered(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    /// Returns true if any recorded message at `severity` contains `needle`.
    #[must_use]
    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.severity == severity && entry.message.contains(needle))
    }
}

fn colorize(severity: Severity, line: &str) -> String {
    match severity {
        Severity::Info => line.cyan().to_string(),
        Severity::Success => line.green().to_string(),
        Severity::Warn => line.yellow().to_string(),
        Severity::Error => line.red().to_string(),
    }
}

/// Options resolved from the command line and environment.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Extension being provisioned.
    pub extension: Extension,
    /// Target operating-system family.
    pub platform: Platform,
    /// Operator-supplied directories that always receive the directive.
    pub extra_dirs: Vec<Utf8PathBuf>,
    /// Timeout applied to runtime invocations.
    pub command_timeout: Duration,
    /// Root prepended to standard install locations during discovery.
    pub search_prefix: Option<Utf8PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        let platform = Platform::current();
        Self {
            extension: Extension::opentelemetry(platform),
            platform,
            extra_dirs: Vec::new(),
            command_timeout: crate::command::DEFAULT_COMMAND_TIMEOUT,
            search_prefix: None,
        }
    }
}

/// Explicit state for one installer run.
#[derive(Debug)]
pub struct RunContext {
    /// Resolved options.
    pub settings: RunSettings,
    /// Accumulated log.
    pub log: RunLog,
}

impl RunContext {
    /// Creates a context from settings and a log.
    #[must_use]
    pub fn new(settings: RunSettings, log: RunLog) -> Self {
        Self { settings, log }
    }

    /// A context with default settings and a silent log, for tests and
    /// programmatic use.
    #[must_use]
    pub fn quiet(settings: RunSettings) -> Self {
        Self::new(settings, RunLog::silent())
    }

    /// Shorthand for the configured extension.
    #[must_use]
    pub fn extension(&self) -> &Extension {
        &self.settings.extension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Shared in-memory sink so tests can read what the log echoed.
    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn record_keeps_entries_in_order() {
        let mut log = RunLog::silent();
        log.info("first");
        log.warn("second");
        log.error("third");

        let severities: Vec<Severity> = log.entries().iter().map(|e| e.severity).collect();
        assert_eq!(
            severities,
            vec![Severity::Info, Severity::Warn, Severity::Error]
        );
        assert!(log.contains(Severity::Warn, "second"));
        assert!(!log.contains(Severity::Info, "second"));
    }

    #[test]
    fn echo_writes_labelled_lines_without_color() {
        let buffer = SharedBuffer::default();
        let mut log = RunLog::new(Box::new(buffer.clone()), false);
        log.success("installed");

        let text = String::from_utf8(buffer.0.borrow().clone()).expect("utf-8 output");
        assert!(text.contains("[SUCCESS] installed"));
        assert!(!text.contains('\u{1b}'), "no ANSI escapes expected");
    }

    #[test]
    fn echo_colors_lines_when_enabled() {
        let buffer = SharedBuffer::default();
        let mut log = RunLog::new(Box::new(buffer.clone()), true);
        log.error("boom");

        let text = String::from_utf8(buffer.0.borrow().clone()).expect("utf-8 output");
        assert!(text.contains('\u{1b}'));
        assert!(text.contains("[ERROR] boom"));
    }

    #[test]
    fn rendered_lines_carry_label_and_message() {
        let mut log = RunLog::silent();
        log.info("searching");
        let rendered = log.rendered();
        assert_eq!(rendered.len(), 1);
        assert!(rendered.first().is_some_and(|l| l.ends_with("[INFO] searching")));
    }
}
