//! Terminal front end helpers.
//!
//! The front end feeds user text into the correlator and renders the `log`
//! stream. Everything here is presentation: it holds no channel state.

use serde_json::{Map, Value};

use crate::models::log::LogEntry;
use crate::{AppError, Result};

/// Prefix of the tool invocation command.
pub const CALL_PREFIX: &str = "/call";

/// One line of user input, interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Plain text for the conversation.
    Say(String),
    /// `/call <op> [json-object]`: invoke an operation and await its result.
    Call {
        /// Operation name.
        tool_func: String,
        /// Extra envelope fields.
        payload: Map<String, Value>,
    },
}

impl Command {
    /// Interpret a raw input line. Blank lines yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Decode`] for a `/call` line without an operation
    /// name or whose payload is not a JSON object.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let Some(rest) = line.strip_prefix(CALL_PREFIX) else {
            return Ok(Some(Self::Say(line.to_owned())));
        };
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            // e.g. "/caller": not our command.
            return Ok(Some(Self::Say(line.to_owned())));
        }

        let rest = rest.trim_start();
        let (tool_func, raw_payload) = match rest.split_once(char::is_whitespace) {
            Some((name, payload)) => (name, payload.trim()),
            None => (rest, ""),
        };
        if tool_func.is_empty() {
            return Err(AppError::Decode("usage: /call <op> [json-object]".into()));
        }

        let payload = if raw_payload.is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(raw_payload)? {
                Value::Object(map) => map,
                other => {
                    return Err(AppError::Decode(format!(
                        "payload must be a JSON object, got: {other}"
                    )))
                }
            }
        };

        Ok(Some(Self::Call {
            tool_func: tool_func.to_owned(),
            payload,
        }))
    }
}

/// Render a log entry as one terminal line.
#[must_use]
pub fn render_log_line(entry: &LogEntry) -> String {
    format!("[{:<5}] {}", entry.severity.as_str(), entry.message)
}
