//! Dialers that turn an address into a text-frame duplex.
//!
//! A [`Connector`] owns the protocol-specific part of opening a connection.
//! Everything above it (state machine, reconnects, fan-out) only sees a
//! [`Duplex`]: a sink accepting outbound text frames and a stream yielding
//! inbound ones.

use std::future::Future;
use std::pin::Pin;

use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::codec::Framed;
use tracing::debug;

use crate::config::validate_url;
use crate::transport::codec::FrameCodec;
use crate::{AppError, Result};

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = AppError> + Send>>;

/// Inbound half of a connection. The stream ending means the peer closed.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Future returned by [`Connector::connect`].
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<Duplex>> + Send + 'a>>;

/// An established connection split into its two directions.
pub struct Duplex {
    /// Outbound text frames.
    pub sink: FrameSink,
    /// Inbound text frames.
    pub stream: FrameStream,
}

impl Duplex {
    /// Box a sink/stream pair.
    #[must_use]
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<String, Error = AppError> + Send + 'static,
        R: Stream<Item = Result<String>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl std::fmt::Debug for Duplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Duplex").finish_non_exhaustive()
    }
}

/// Opens connections to a peer address.
pub trait Connector: Send + Sync {
    /// Dial `url` and return the established duplex.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] when the peer cannot be reached and
    /// [`AppError::Config`] when the address is unusable.
    fn connect<'a>(&'a self, url: &'a str) -> ConnectFuture<'a>;
}

/// WebSocket text-frame connector for `ws://` and `wss://` addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect<'a>(&'a self, url: &'a str) -> ConnectFuture<'a> {
        Box::pin(async move {
            let (socket, _response) = tokio_tungstenite::connect_async(url)
                .await
                .map_err(|err| AppError::Transport(format!("websocket connect failed: {err}")))?;
            debug!(url, "websocket handshake complete");

            let (sink, stream) = socket.split();
            let sink = sink
                .sink_map_err(|err| AppError::Transport(format!("websocket write failed: {err}")))
                .with(|text: String| future::ready(Ok::<_, AppError>(Message::Text(text))));
            let stream = stream.filter_map(|item| future::ready(text_frame(item)));

            Ok(Duplex::new(sink, stream))
        })
    }
}

/// NDJSON-over-TCP connector for `tcp://host:port` addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpLineConnector;

impl Connector for TcpLineConnector {
    fn connect<'a>(&'a self, url: &'a str) -> ConnectFuture<'a> {
        Box::pin(async move {
            let address = tcp_address(url)?;
            let stream = TcpStream::connect(&address)
                .await
                .map_err(|err| AppError::Transport(format!("tcp connect to {address} failed: {err}")))?;
            debug!(%address, "tcp connection established");

            let (sink, stream) = Framed::new(stream, FrameCodec::new()).split();
            Ok(Duplex::new(sink, stream))
        })
    }
}

/// Picks [`WsConnector`] or [`TcpLineConnector`] from the URL scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnector {
    ws: WsConnector,
    tcp: TcpLineConnector,
}

impl Connector for DefaultConnector {
    fn connect<'a>(&'a self, url: &'a str) -> ConnectFuture<'a> {
        Box::pin(async move {
            let parsed = validate_url(url)?;
            if parsed.scheme() == "tcp" {
                self.tcp.connect(url).await
            } else {
                self.ws.connect(url).await
            }
        })
    }
}

/// Extract `host:port` from a `tcp://` URL.
///
/// # Errors
///
/// Returns [`AppError::Config`] when the URL has no host or no port.
pub fn tcp_address(url: &str) -> Result<String> {
    let parsed = validate_url(url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::Config(format!("tcp url '{url}' has no host")))?;
    let port = parsed
        .port()
        .ok_or_else(|| AppError::Config(format!("tcp url '{url}' has no port")))?;
    Ok(format!("{host}:{port}"))
}

fn text_frame(item: std::result::Result<Message, tungstenite::Error>) -> Option<Result<String>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(text)),
        Ok(Message::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
        // Control frames are handled by tungstenite itself.
        Ok(_) => None,
        Err(err) => Some(Err(AppError::Transport(format!(
            "websocket read failed: {err}"
        )))),
    }
}
