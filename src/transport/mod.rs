//! Resilient message transport.
//!
//! - `codec`: line framing for `tcp://` peers.
//! - `connector`: protocol-specific dialers producing a text-frame [`Duplex`].
//! - `client`: the reconnecting [`Transport`] state machine and its subscriber sets.
//! - `registry`: one [`Transport`] per address.

pub mod client;
pub mod codec;
pub mod connector;
pub mod registry;

pub use client::{ConnectionState, EventKind, Payload, Reconnect, Transport, TransportEvent};
pub use connector::{
    Connector, DefaultConnector, Duplex, FrameSink, FrameStream, TcpLineConnector, WsConnector,
};
pub use registry::TransportRegistry;
