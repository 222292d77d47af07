//! UI-facing log lines.

use serde::{Deserialize, Serialize};

/// Display class of a log line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Lifecycle and neutral notices.
    Info,
    /// Faults: disconnects, malformed frames, peer errors.
    Error,
    /// Assistant output.
    Ai,
    /// Tool call activity.
    Tool,
}

impl Severity {
    /// Wire/CSS name of the severity.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Error => "error",
            Self::Ai => "ai",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One human-readable line on the `log` stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// Text to render.
    pub message: String,
    /// Display class.
    pub severity: Severity,
}

impl LogEntry {
    /// Build a log entry.
    #[must_use]
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}
