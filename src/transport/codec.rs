//! NDJSON codec for `tcp://` peers.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum frame length so a
//! peer that never sends a newline cannot make the client allocate without
//! bound. Each `\n`-terminated UTF-8 line is one envelope.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::Framed;
//! use agent_comm::transport::codec::FrameCodec;
//!
//! let framed = Framed::new(tcp_stream, FrameCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum inbound frame length: 1 MiB.
pub const MAX_FRAME_BYTES: usize = 1_048_576;

/// Line-delimited frame codec used by [`TcpLineConnector`](super::TcpLineConnector).
///
/// Inbound lines longer than [`MAX_FRAME_BYTES`] return
/// [`AppError::Transport`]`("frame too long: …")`. The limit is not applied
/// to outbound frames.
#[derive(Debug)]
pub struct FrameCodec(LinesCodec);

impl FrameCodec {
    /// Create a codec with the default [`MAX_FRAME_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_BYTES)
    }

    /// Create a codec with a custom inbound limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max_length))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next `\n`-terminated frame from `src`.
    ///
    /// Returns `Ok(None)` while no complete line is buffered. A trailing
    /// `\r` is stripped along with the newline.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`]`("frame too long: …")` when the
    /// buffered line exceeds the configured limit, and [`AppError::Io`] on
    /// underlying I/O failures.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode the final frame when the stream reaches EOF.
    ///
    /// A last line without a terminating newline is still returned as a
    /// frame.
    ///
    /// # Errors
    ///
    /// Same mapping as [`decode`](Self::decode).
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated line into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on underlying I/O failures.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        // The frame limit is a decoder concern; outbound lines are not checked.
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

/// Frame-length overflows become transport errors; the rest are I/O.
fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Transport("frame too long: exceeded maximum line length".into())
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
