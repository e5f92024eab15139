//! WebSocket frame parsing and encoding for the RFC 6455 subset this crate speaks.
//!
//! Only unfragmented frames exist here: the FIN bit is always written and
//! never inspected, and the RSV bits are ignored. Payload length is resolved
//! before anything else is buffered so an oversized frame is rejected from its
//! header alone.

use bytes::{BufMut, Bytes, BytesMut};

/// Largest payload accepted from a peer unless configured otherwise (1 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 1 << 20;

/// WebSocket opcodes as defined in RFC 6455 Section 5.2.
///
/// `Continuation` and `Binary` are recognized so a well-formed frame carrying
/// them can be skipped, but nothing in this crate produces or interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WebSocketOpcode {
    /// Continuation frame (0x0)
    Continuation = 0x0,
    /// Text data frame (0x1)
    Text = 0x1,
    /// Binary data frame (0x2)
    Binary = 0x2,
    /// Connection close frame (0x8)
    Close = 0x8,
    /// Ping frame (0x9)
    Ping = 0x9,
    /// Pong frame (0xA)
    Pong = 0xA,
}

impl WebSocketOpcode {
    /// Parse opcode from 4-bit value.
    pub fn from_u8(value: u8) -> Result<Self, WebSocketError> {
        match value {
            0x0 => Ok(WebSocketOpcode::Continuation),
            0x1 => Ok(WebSocketOpcode::Text),
            0x2 => Ok(WebSocketOpcode::Binary),
            0x8 => Ok(WebSocketOpcode::Close),
            0x9 => Ok(WebSocketOpcode::Ping),
            0xA => Ok(WebSocketOpcode::Pong),
            _ => Err(WebSocketError::InvalidOpcode(value)),
        }
    }
}

/// Errors produced while reading or writing frames on a connection.
#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
    /// Opcode outside the RFC 6455 table
    #[error("invalid WebSocket opcode: {0:#x}")]
    InvalidOpcode(u8),
    /// More bytes are needed before the frame can be parsed
    #[error("incomplete WebSocket frame")]
    IncompleteFrame,
    /// Declared payload length is over the configured cap
    #[error("frame payload of {length} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Length declared in the frame header
        length: u64,
        /// Configured cap
        max: usize,
    },
    /// The stream ended part way through a frame
    #[error("stream ended in the middle of a frame")]
    UnexpectedEof,
    /// The connection was closed locally before the write
    #[error("connection closed")]
    ConnectionClosed,
    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketFrame {
    /// Opcode: identifies the frame type
    pub opcode: WebSocketOpcode,
    /// Whether the frame arrived masked (client→server frames should be)
    pub masked: bool,
    /// Payload data, already unmasked
    pub payload: Vec<u8>,
}

impl WebSocketFrame {
    /// Parse a WebSocket frame from bytes.
    ///
    /// Returns the parsed frame and the number of bytes consumed.
    /// Returns `Err(WebSocketError::IncompleteFrame)` if more data is needed,
    /// and `Err(WebSocketError::FrameTooLarge)` as soon as the header shows a
    /// payload longer than `max_payload`, without waiting for the payload.
    ///
    /// # Frame Format
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-------+-+-------------+-------------------------------+
    /// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
    /// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
    /// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
    /// | |1|2|3|       |K|             |                               |
    /// +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
    /// |     Extended payload length continued, if payload len == 127  |
    /// + - - - - - - - - - - - - - - - +-------------------------------+
    /// |                               |Masking-key, if MASK set to 1  |
    /// +-------------------------------+-------------------------------+
    /// | Masking-key (continued)       |          Payload Data         |
    /// +-------------------------------- - - - - - - - - - - - - - - - +
    /// ```
    ///
    /// Unmasked client frames are accepted as-is.
    pub fn parse(data: &[u8], max_payload: usize) -> Result<(Self, usize), WebSocketError> {
        if data.len() < 2 {
            return Err(WebSocketError::IncompleteFrame);
        }

        // FIN and RSV bits are not inspected
        let opcode = WebSocketOpcode::from_u8(data[0] & 0b0000_1111)?;

        let masked = (data[1] & 0b1000_0000) != 0;
        let mut payload_len = (data[1] & 0b0111_1111) as u64;

        let mut offset = 2;

        if payload_len == 126 {
            if data.len() < offset + 2 {
                return Err(WebSocketError::IncompleteFrame);
            }
            payload_len = u16::from_be_bytes([data[offset], data[offset + 1]]) as u64;
            offset += 2;
        } else if payload_len == 127 {
            if data.len() < offset + 8 {
                return Err(WebSocketError::IncompleteFrame);
            }
            let mut extended = [0u8; 8];
            extended.copy_from_slice(&data[offset..offset + 8]);
            payload_len = u64::from_be_bytes(extended);
            offset += 8;
        }

        if payload_len > max_payload as u64 {
            return Err(WebSocketError::FrameTooLarge {
                length: payload_len,
                max: max_payload,
            });
        }
        let payload_len = payload_len as usize;

        let masking_key = if masked {
            if data.len() < offset + 4 {
                return Err(WebSocketError::IncompleteFrame);
            }
            let key = [
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ];
            offset += 4;
            Some(key)
        } else {
            None
        };

        if data.len() < offset + payload_len {
            return Err(WebSocketError::IncompleteFrame);
        }

        let mut payload = data[offset..offset + payload_len].to_vec();
        offset += payload_len;

        if let Some(mask) = masking_key {
            apply_mask(&mut payload, &mask);
        }

        Ok((
            WebSocketFrame {
                opcode,
                masked,
                payload,
            },
            offset,
        ))
    }

    /// Encode this frame into `dst` with FIN set.
    ///
    /// Server frames pass `None`; a masking key is only supplied when acting
    /// as a client.
    pub fn encode_into(&self, dst: &mut BytesMut, mask: Option<[u8; 4]>) {
        let payload_len = self.payload.len();
        dst.reserve(header_len(payload_len, mask.is_some()) + payload_len);

        dst.put_u8(0b1000_0000 | self.opcode as u8);

        let mask_bit = if mask.is_some() { 0b1000_0000 } else { 0 };
        if payload_len < 126 {
            dst.put_u8(mask_bit | payload_len as u8);
        } else if payload_len <= u16::MAX as usize {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(payload_len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(payload_len as u64);
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask(&mut dst[start..], &key);
            }
            None => dst.put_slice(&self.payload),
        }
    }

    /// Encode this frame to a standalone buffer.
    pub fn encode(&self, mask: Option<[u8; 4]>) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf, mask);
        buf.freeze()
    }

    /// Create a frame with the given opcode and payload.
    pub fn new(opcode: WebSocketOpcode, payload: impl Into<Vec<u8>>) -> Self {
        WebSocketFrame {
            opcode,
            masked: false,
            payload: payload.into(),
        }
    }

    /// Create a new text frame.
    pub fn new_text(text: impl Into<String>) -> Self {
        Self::new(WebSocketOpcode::Text, text.into().into_bytes())
    }

    /// Create a new ping frame.
    pub fn new_ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(WebSocketOpcode::Ping, data)
    }

    /// Create a new pong frame.
    pub fn new_pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(WebSocketOpcode::Pong, data)
    }

    /// Create a new close frame with optional status code.
    pub fn new_close(code: Option<u16>) -> Self {
        let payload = code.map(|c| c.to_be_bytes().to_vec()).unwrap_or_default();
        Self::new(WebSocketOpcode::Close, payload)
    }

    /// Status code carried by a close frame, if any.
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != WebSocketOpcode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }

    /// Get the payload as a UTF-8 text string.
    /// Returns None if the frame is not a text frame or contains invalid UTF-8.
    pub fn payload_as_text(&self) -> Option<&str> {
        if self.opcode != WebSocketOpcode::Text {
            return None;
        }
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Number of header bytes preceding a payload of `payload_len` bytes.
pub fn header_len(payload_len: usize, masked: bool) -> usize {
    let length_bytes = if payload_len < 126 {
        0
    } else if payload_len <= u16::MAX as usize {
        2
    } else {
        8
    };
    2 + length_bytes + if masked { 4 } else { 0 }
}

/// Apply XOR mask to payload data per RFC 6455 Section 5.3.
///
/// Applying the same mask twice yields the original data.
pub fn apply_mask(payload: &mut [u8], mask: &[u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_text_frame() {
        let data = vec![
            0b1000_0001, // FIN=1, Opcode=Text
            5,           // Payload length=5
            b'H',
            b'e',
            b'l',
            b'l',
            b'o',
        ];

        let (frame, consumed) = WebSocketFrame::parse(&data, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(consumed, 7);
        assert_eq!(frame.opcode, WebSocketOpcode::Text);
        assert!(!frame.masked);
        assert_eq!(frame.payload, b"Hello");
    }

    #[test]
    fn test_parse_masked_frame() {
        let mask = [0x12, 0x34, 0x56, 0x78];
        let mut payload = b"Hello".to_vec();
        apply_mask(&mut payload, &mask);

        let mut data = vec![
            0b1000_0001, // FIN=1, Opcode=Text
            0b1000_0101, // MASK=1, Payload length=5
        ];
        data.extend_from_slice(&mask);
        data.extend_from_slice(&payload);

        let (frame, consumed) = WebSocketFrame::parse(&data, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(consumed, 11);
        assert!(frame.masked);
        assert_eq!(frame.payload, b"Hello");
    }

    #[test]
    fn test_encode_frame() {
        let encoded = WebSocketFrame::new_text("Hello").encode(None);

        let expected = vec![
            0b1000_0001, // FIN=1, Opcode=Text
            5,           // Payload length=5
            b'H',
            b'e',
            b'l',
            b'l',
            b'o',
        ];
        assert_eq!(encoded, expected);
    }

    #[test]
    fn test_length_tiers_round_trip() {
        for len in [0usize, 1, 125, 126, 65535, 65536] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frame = WebSocketFrame::new(WebSocketOpcode::Text, payload.clone());

            // Server side: never masked
            let server = frame.encode(None);
            assert_eq!(server.len(), header_len(len, false) + len);
            assert_eq!(server[1] & 0b1000_0000, 0);
            let (decoded, consumed) = WebSocketFrame::parse(&server, DEFAULT_MAX_PAYLOAD).unwrap();
            assert_eq!(consumed, server.len());
            assert_eq!(decoded.payload, payload, "unmasked length {len}");

            // Client side: masked
            let client = frame.encode(Some([0xde, 0xad, 0xbe, 0xef]));
            assert_eq!(client.len(), header_len(len, true) + len);
            let (decoded, consumed) = WebSocketFrame::parse(&client, DEFAULT_MAX_PAYLOAD).unwrap();
            assert_eq!(consumed, client.len());
            assert!(decoded.masked);
            assert_eq!(decoded.payload, payload, "masked length {len}");
        }
    }

    #[test]
    fn test_length_tier_markers() {
        assert_eq!(WebSocketFrame::new_text("a".repeat(125)).encode(None)[1], 125);

        let medium = WebSocketFrame::new_text("a".repeat(126)).encode(None);
        assert_eq!(medium[1], 126);
        assert_eq!(&medium[2..4], &[0x00, 0x7E]);

        let large = WebSocketFrame::new_text("a".repeat(65536)).encode(None);
        assert_eq!(large[1], 127);
        assert_eq!(&large[2..10], &[0, 0, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_masking_is_transparent_for_any_key() {
        let payload = b"{\"type\":\"interaction\",\"payload\":{\"x\":1}}".to_vec();
        for key in [[0, 0, 0, 0], [0xff, 0xff, 0xff, 0xff], [1, 2, 3, 4], [0x80, 0x7f, 0x00, 0xaa]] {
            let encoded = WebSocketFrame::new(WebSocketOpcode::Text, payload.clone()).encode(Some(key));
            let (frame, _) = WebSocketFrame::parse(&encoded, DEFAULT_MAX_PAYLOAD).unwrap();
            assert_eq!(frame.payload, payload);
        }
    }

    #[test]
    fn test_extended_length_16bit() {
        let payload = vec![0u8; 200];
        let mut data = vec![
            0b1000_0001, // FIN=1, Opcode=Text
            126,         // Extended 16-bit length indicator
            0x00,
            0xC8, // Length = 200
        ];
        data.extend_from_slice(&payload);

        let (frame, consumed) = WebSocketFrame::parse(&data, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(consumed, 204);
        assert_eq!(frame.payload.len(), 200);
    }

    #[test]
    fn test_oversized_frame_rejected_from_header() {
        // 64-bit length of 1 MiB + 1, no payload bytes present at all
        let mut data = vec![0b1000_0001, 0b1000_0000 | 127];
        data.extend_from_slice(&((DEFAULT_MAX_PAYLOAD as u64) + 1).to_be_bytes());

        let result = WebSocketFrame::parse(&data, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(
            result,
            Err(WebSocketError::FrameTooLarge { length, max })
                if length == DEFAULT_MAX_PAYLOAD as u64 + 1 && max == DEFAULT_MAX_PAYLOAD
        ));
    }

    #[test]
    fn test_payload_at_cap_is_accepted() {
        let frame = WebSocketFrame::new(WebSocketOpcode::Text, vec![b'x'; 300]);
        let encoded = frame.encode(Some([9, 9, 9, 9]));
        assert!(WebSocketFrame::parse(&encoded, 300).is_ok());
        assert!(matches!(
            WebSocketFrame::parse(&encoded, 299),
            Err(WebSocketError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_fin_bit_is_ignored() {
        let data = vec![0b0000_0001, 2, b'h', b'i'];
        let (frame, _) = WebSocketFrame::parse(&data, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(frame.opcode, WebSocketOpcode::Text);
        assert_eq!(frame.payload, b"hi");
    }

    #[test]
    fn test_reserved_opcode_rejected() {
        let data = vec![0b1000_0011, 0];
        assert!(matches!(
            WebSocketFrame::parse(&data, DEFAULT_MAX_PAYLOAD),
            Err(WebSocketError::InvalidOpcode(0x3))
        ));
    }

    #[test]
    fn test_empty_pong_round_trip() {
        let encoded = WebSocketFrame::new_pong(Vec::new()).encode(None);
        assert_eq!(&encoded[..], &[0b1000_1010, 0]);

        let (frame, consumed) = WebSocketFrame::parse(&encoded, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(frame.opcode, WebSocketOpcode::Pong);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_close_code() {
        let encoded = WebSocketFrame::new_close(Some(1000)).encode(None);
        let (parsed, _) = WebSocketFrame::parse(&encoded, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(parsed.close_code(), Some(1000));
        assert_eq!(WebSocketFrame::new_close(None).close_code(), None);
    }

    #[test]
    fn test_incomplete_frame() {
        let data = vec![0b1000_0001]; // Only first byte
        let result = WebSocketFrame::parse(&data, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(WebSocketError::IncompleteFrame)));

        // Header complete, payload short
        let data = vec![0b1000_0001, 5, b'H', b'e'];
        let result = WebSocketFrame::parse(&data, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(WebSocketError::IncompleteFrame)));
    }
}
