//! Frame reader over any async byte stream.

use super::{WebSocketCodec, WebSocketError, WebSocketFrame};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;

/// Reads WebSocket frames one at a time.
///
/// Uses WebSocketCodec internally to handle frame parsing. Bytes that were
/// read past the HTTP request head can be handed over as a prefix so nothing
/// the client sent early is lost.
pub struct FrameReader<R> {
    reader: R,
    codec: WebSocketCodec,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a new FrameReader from any AsyncRead type.
    pub fn new(reader: R, codec: WebSocketCodec) -> Self {
        Self::with_prefix(reader, codec, BytesMut::new())
    }

    /// Create a FrameReader whose first bytes come from `prefix`.
    pub fn with_prefix(reader: R, codec: WebSocketCodec, mut prefix: BytesMut) -> Self {
        prefix.reserve(8192);
        FrameReader {
            reader,
            codec,
            buffer: prefix,
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was read, `Ok(None)` if
    /// the stream ended cleanly between frames, or `Err` on error (including
    /// a stream that ends inside a frame).
    ///
    /// Cancel safe: bytes already read stay buffered for the next call.
    pub async fn read_frame(&mut self) -> Result<Option<WebSocketFrame>, WebSocketError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(frame));
            }

            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                return self.codec.decode_eof(&mut self.buffer);
            }
        }
    }
}
