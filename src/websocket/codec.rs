//! WebSocket codec for use with tokio_util's `Decoder`/`Encoder` traits.
//!
//! Turns a byte buffer into whole frames and back. There is no message
//! reassembly: every frame is delivered as it arrives.

use super::frame::{DEFAULT_MAX_PAYLOAD, WebSocketError, WebSocketFrame, WebSocketOpcode};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

/// WebSocket codec that implements tokio_util's Decoder and Encoder traits.
///
/// Decoding enforces the payload cap as soon as a frame header is buffered,
/// so a hostile length never causes a large allocation. Encoding never masks.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketCodec {
    max_payload: usize,
}

impl WebSocketCodec {
    /// Create a new WebSocket codec with the default 1 MiB payload cap.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Create a codec that rejects payloads longer than `max_payload`.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// The payload cap applied while decoding.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Default for WebSocketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WebSocketCodec {
    type Item = WebSocketFrame;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match WebSocketFrame::parse(src, self.max_payload) {
            Ok((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            Err(WebSocketError::IncompleteFrame) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(WebSocketError::UnexpectedEof),
        }
    }
}

impl Encoder<WebSocketFrame> for WebSocketCodec {
    type Error = WebSocketError;

    fn encode(&mut self, frame: WebSocketFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame.encode_into(dst, None);
        Ok(())
    }
}

/// Write one unmasked frame to `writer` and flush it.
///
/// Callers sharing a writer between tasks must serialize calls themselves;
/// see [`Connection`](crate::Connection).
pub async fn write_frame<W>(
    writer: &mut W,
    opcode: WebSocketOpcode,
    payload: &[u8],
) -> Result<(), WebSocketError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buffer = BytesMut::new();
    WebSocketFrame::new(opcode, payload).encode_into(&mut buffer, None);
    writer.write_all(&buffer).await?;
    writer.flush().await?;
    Ok(())
}
