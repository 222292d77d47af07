//! Client configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::{AppError, Result};

/// Schemes the default connector knows how to dial.
pub const SUPPORTED_SCHEMES: [&str; 3] = ["ws", "wss", "tcp"];

/// Automatic reconnect settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReconnectConfig {
    /// Reconnect attempts allowed between two successful opens.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Constant delay before each reconnect attempt.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

/// Settings for answering tool calls pushed by the peer.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolConfig {
    /// Delay the simulated executor waits before replying.
    #[serde(default = "default_reply_delay_ms")]
    pub reply_delay_ms: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            reply_delay_ms: default_reply_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    3000
}

fn default_reply_delay_ms() -> u64 {
    1000
}

fn default_thread_prefix() -> String {
    "thread-".into()
}

/// Client configuration parsed from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Address of the remote peer (`ws://`, `wss://` or `tcp://`).
    pub url: String,
    /// Prefix of generated thread ids.
    #[serde(default = "default_thread_prefix")]
    pub thread_prefix: String,
    /// Reconnect policy settings.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Tool-call reply settings.
    #[serde(default)]
    pub tools: ToolConfig,
}

impl ClientConfig {
    /// Build a configuration with default settings around `url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the address is not a supported URL.
    pub fn for_url(url: impl Into<String>) -> Result<Self> {
        let config = Self {
            url: url.into(),
            thread_prefix: default_thread_prefix(),
            reconnect: ReconnectConfig::default(),
            tools: ToolConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reconnect policy derived from the `[reconnect]` table.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect.max_attempts,
            delay: Duration::from_millis(self.reconnect.delay_ms),
        }
    }

    /// Delay used by the simulated tool executor.
    #[must_use]
    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.tools.reply_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        validate_url(&self.url)?;

        if self.thread_prefix.is_empty() {
            return Err(AppError::Config("thread_prefix must not be empty".into()));
        }

        Ok(())
    }
}

/// Bounded reconnect policy: a ceiling and a constant delay.
///
/// There is no jitter and no exponential growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect attempts allowed between two successful opens.
    pub max_attempts: u32,
    /// Delay before each attempt.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay: Duration::from_millis(default_delay_ms()),
        }
    }
}

/// Check that `raw` parses as a URL with a supported scheme.
///
/// # Errors
///
/// Returns `AppError::Config` when parsing fails or the scheme is unknown.
pub fn validate_url(raw: &str) -> Result<Url> {
    let url =
        Url::parse(raw).map_err(|err| AppError::Config(format!("invalid url '{raw}': {err}")))?;
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(AppError::Config(format!(
            "unsupported url scheme '{}' (expected ws, wss or tcp)",
            url.scheme()
        )));
    }
    Ok(url)
}
