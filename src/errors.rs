//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure the channel can surface.
///
/// Most transport faults never reach a caller: they are retried by the
/// reconnect policy and reported through `tracing` and the `log` stream.
/// The variants below are what the remaining fallible operations return.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Connection establishment or stream failure.
    Transport(String),
    /// A send that requires an open connection was attempted while closed.
    NotConnected(String),
    /// Inbound frame could not be decoded.
    Decode(String),
    /// A caller-supplied deadline elapsed before a reply arrived.
    Timeout(String),
    /// File-system or socket I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::NotConnected(msg) => write!(f, "not connected: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(format!("malformed json: {err}"))
    }
}
