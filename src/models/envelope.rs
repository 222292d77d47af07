//! Wire envelopes exchanged with the peer.
//!
//! Every envelope is a JSON object. Inbound objects are classified by their
//! `type` discriminator first and by a truthy top-level `error` field second.
//!
//! # Known inbound shapes
//!
//! | Shape                                            | Maps to                      |
//! |--------------------------------------------------|------------------------------|
//! | `{type:"ai_message", content}`                   | [`Inbound::AiMessage`]       |
//! | `{type:"tool_call", tool_func, thread_id, ...}`  | [`Inbound::ToolCall`]        |
//! | `{type:"tool_result", tool_func, thread_id, result}` | [`Inbound::ToolResult`]  |
//! | `{type:"end"}`                                   | [`Inbound::End`]             |
//! | `{error}`                                        | [`Inbound::PeerError`]       |
//! | *(anything else that is valid JSON)*             | [`Inbound::Unrecognized`]    |

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::Result;

/// Composite key correlating a tool invocation with its result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationKey {
    /// Operation name.
    pub tool_func: String,
    /// Conversation the invocation belongs to.
    pub thread_id: String,
}

impl CorrelationKey {
    /// Build a key from its two components.
    #[must_use]
    pub fn new(tool_func: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            tool_func: tool_func.into(),
            thread_id: thread_id.into(),
        }
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.tool_func, self.thread_id)
    }
}

/// Outcome carried in the `result` field of a `tool_result` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResult {
    /// Whether the tool ran successfully.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
}

impl ToolResult {
    /// JSON form placed on the wire and handed to futures and listeners.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({ "success": self.success, "message": self.message })
    }
}

/// A `tool_call` pushed by the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Operation name.
    pub tool_func: String,
    /// Conversation id; empty when the peer omitted it.
    pub thread_id: String,
    /// Complete inbound envelope, including any extra payload fields.
    pub envelope: Value,
}

impl ToolCall {
    /// Correlation key of this call.
    #[must_use]
    pub fn key(&self) -> CorrelationKey {
        CorrelationKey::new(&self.tool_func, &self.thread_id)
    }
}

/// A classified inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Assistant text for the conversation log.
    AiMessage {
        /// Message content as sent by the peer.
        content: Value,
    },
    /// Peer asks this side to run an operation.
    ToolCall(ToolCall),
    /// Peer reports the result of an operation.
    ToolResult {
        /// Operation name.
        tool_func: String,
        /// Conversation id; empty when the peer omitted it.
        thread_id: String,
        /// Result payload, passed through untouched.
        result: Value,
    },
    /// The current conversation turn is over.
    End,
    /// Peer-reported error.
    PeerError(String),
    /// Valid JSON that matches no known shape.
    Unrecognized,
}

/// Decode and classify one inbound text frame.
///
/// # Errors
///
/// Returns [`AppError::Decode`](crate::AppError::Decode)`("malformed json: …")`
/// when the frame is not valid JSON. Valid JSON of an unknown shape is
/// `Ok(Inbound::Unrecognized)`.
pub fn parse_inbound_frame(frame: &str) -> Result<Inbound> {
    let value: Value = serde_json::from_str(frame)?;
    Ok(classify(value))
}

/// Classify an already decoded JSON value.
#[must_use]
pub fn classify(value: Value) -> Inbound {
    let Some(object) = value.as_object() else {
        return Inbound::Unrecognized;
    };

    match object.get("type").and_then(Value::as_str) {
        Some("ai_message") => Inbound::AiMessage {
            content: object.get("content").cloned().unwrap_or(Value::Null),
        },
        Some("tool_call") => match string_field(object, "tool_func") {
            Some(tool_func) => Inbound::ToolCall(ToolCall {
                tool_func,
                thread_id: string_field(object, "thread_id").unwrap_or_default(),
                envelope: value,
            }),
            None => Inbound::Unrecognized,
        },
        Some("tool_result") => match string_field(object, "tool_func") {
            Some(tool_func) => Inbound::ToolResult {
                tool_func,
                thread_id: string_field(object, "thread_id").unwrap_or_default(),
                result: object.get("result").cloned().unwrap_or(Value::Null),
            },
            None => Inbound::Unrecognized,
        },
        Some("end") => Inbound::End,
        _ => match object.get("error") {
            Some(error) if is_truthy(error) => Inbound::PeerError(display_value(error)),
            _ => Inbound::Unrecognized,
        },
    }
}

/// Outbound user message: `{input, thread_id}`.
#[must_use]
pub fn user_message(input: &Value, thread_id: &str) -> Value {
    json!({ "input": input, "thread_id": thread_id })
}

/// Outbound invocation: `{type:"tool_call", tool_func, ...payload, thread_id}`.
///
/// Payload fields are copied first; `type`, `tool_func` and `thread_id` always
/// carry the invocation's own values.
#[must_use]
pub fn tool_call(tool_func: &str, thread_id: &str, payload: &Map<String, Value>) -> Value {
    let mut envelope = payload.clone();
    envelope.insert("type".into(), Value::from("tool_call"));
    envelope.insert("tool_func".into(), Value::from(tool_func));
    envelope.insert("thread_id".into(), Value::from(thread_id));
    Value::Object(envelope)
}

/// Outbound reply: `{type:"tool_result", tool_func, result, thread_id}`.
#[must_use]
pub fn tool_result(tool_func: &str, thread_id: &str, result: &Value) -> Value {
    json!({
        "type": "tool_result",
        "tool_func": tool_func,
        "result": result,
        "thread_id": thread_id,
    })
}

/// Render a JSON value for a log line: strings verbatim, everything else as JSON.
#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// `true` for values a loosely-typed peer treats as "set".
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn string_field(object: &Map<String, Value>, name: &str) -> Option<String> {
    object.get(name).and_then(Value::as_str).map(str::to_owned)
}
