//! WebSocket framing for the RFC 6455 subset used by display clients.
//!
//! Text, close, ping and pong frames only; no fragmentation, no extensions.
//! Server frames are written unmasked, client frames are unmasked on read.

mod codec;
mod frame;
mod reader;

pub use codec::{WebSocketCodec, write_frame};
pub use frame::{
    DEFAULT_MAX_PAYLOAD, WebSocketError, WebSocketFrame, WebSocketOpcode, apply_mask, header_len,
};
pub use reader::FrameReader;
