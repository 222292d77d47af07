#![forbid(unsafe_code)]

//! Reconnecting duplex message channel with tool-call correlation.
//!
//! - [`transport`]: one resilient connection per address, with event fan-out
//!   and a bounded constant-delay reconnect policy.
//! - [`correlator`]: envelope routing, promise-style and event-style tool
//!   invocations, and automatic answers to tool calls pushed by the peer.
//! - [`adapter`]: presentation helpers for a terminal front end.

pub mod adapter;
pub mod config;
pub mod correlator;
pub mod errors;
pub mod listeners;
pub mod models;
pub mod transport;

pub use config::ClientConfig;
pub use correlator::Correlator;
pub use errors::{AppError, Result};
pub use transport::{Transport, TransportRegistry};
