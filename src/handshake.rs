//! WebSocket HTTP upgrade handshake.
//!
//! Validates the client's upgrade request, computes `Sec-WebSocket-Accept`,
//! takes the raw stream out of the request and writes `101 Switching
//! Protocols` on it. Rejections carry the HTTP status the caller should
//! answer with; nothing is registered for a rejected request.

use crate::transport::{Request, RequestExt, Upgraded};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use http::StatusCode;
use http::header::{SEC_WEBSOCKET_KEY, UPGRADE};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// GUID appended to the client key before hashing (RFC 6455 Section 1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Reasons an upgrade request does not become a connection.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// `Upgrade` header missing or not `websocket`
    #[error("Upgrade header must be \"websocket\"")]
    NotWebSocket,
    /// `Sec-WebSocket-Key` header missing or empty
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
    /// The request carries no stream that can be taken over
    #[error("connection does not support takeover")]
    TakeoverUnavailable,
    /// Writing the 101 response failed after takeover
    #[error("failed to write handshake response: {0}")]
    Io(#[from] std::io::Error),
}

impl HandshakeError {
    /// Status to answer with, or `None` once the stream has been taken over.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            HandshakeError::NotWebSocket | HandshakeError::MissingKey => {
                Some(StatusCode::BAD_REQUEST)
            }
            HandshakeError::TakeoverUnavailable => Some(StatusCode::INTERNAL_SERVER_ERROR),
            HandshakeError::Io(_) => None,
        }
    }
}

/// Compute the `Sec-WebSocket-Accept` value: `base64(SHA-1(key + GUID))`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Check the upgrade headers and return the client key.
pub fn validate(request: &Request) -> Result<&str, HandshakeError> {
    let upgrade = request
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    if !upgrade.is_some_and(|v| v.eq_ignore_ascii_case("websocket")) {
        return Err(HandshakeError::NotWebSocket);
    }

    request
        .headers()
        .get(SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or(HandshakeError::MissingKey)
}

/// Perform the upgrade.
///
/// On success the returned stream has already carried the `101` response and
/// is ready for frame I/O. On a 400/500 error the stream is still in the
/// request's [`Transport`](crate::transport::Transport) for the caller to answer on.
pub async fn negotiate<S>(request: &Request) -> Result<Upgraded<S>, HandshakeError>
where
    S: AsyncWrite + Unpin + Send + 'static,
{
    let accept = accept_key(validate(request)?);

    let mut upgraded = request
        .take_transport::<S>()
        .ok_or(HandshakeError::TakeoverUnavailable)?;

    write_switching_protocols(&mut upgraded.stream, &accept).await?;
    Ok(upgraded)
}

/// Write the `101 Switching Protocols` response to the stream.
pub async fn write_switching_protocols<W>(stream: &mut W, accept: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}
