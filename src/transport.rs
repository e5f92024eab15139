//! Just enough HTTP/1.1 to receive an upgrade request and hand the socket over.
//!
//! The accept loop reads a request head straight off the socket into an
//! [`http::Request<()>`], then parks the socket itself in the request's
//! extensions as a [`Transport`]. Whoever handles the request can take the
//! raw stream out of it and stop speaking HTTP.

use bytes::BytesMut;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use http::{StatusCode, Version};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Request type seen by the handshake: head only, no body.
pub type Request = http::Request<()>;

/// Response type written back before a takeover or on rejection.
pub type Response = http::Response<String>;

/// Largest request head accepted (16 KiB).
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Errors while reading a request head.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The peer closed the socket before sending a full head
    #[error("connection closed before the request head was complete")]
    Closed,
    /// The head did not end within the size limit
    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),
    /// Request line or a header line could not be parsed
    #[error("malformed request head: {0}")]
    Malformed(String),
    /// A parsed component was rejected by the `http` crate
    #[error("invalid request: {0}")]
    Http(#[from] http::Error),
    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HttpError {
    /// Status to answer with, or `None` when there is nobody left to answer.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            HttpError::Closed | HttpError::Io(_) => None,
            HttpError::HeadTooLarge(_) => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            HttpError::Malformed(_) | HttpError::Http(_) => Some(StatusCode::BAD_REQUEST),
        }
    }
}

/// Socket information for a request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SocketInfo {
    /// Local socket address
    pub local: Option<SocketAddr>,
    /// Remote socket address
    pub remote: Option<SocketAddr>,
}

impl SocketInfo {
    /// Create a new SocketInfo with both local and remote addresses
    pub fn new(local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self {
        Self { local, remote }
    }
}

/// A raw duplex stream taken over from the HTTP layer.
///
/// `read_buf` holds any bytes that arrived after the request head; they
/// belong to the next protocol and must be consumed before `stream`.
#[derive(Debug)]
pub struct Upgraded<S> {
    /// The socket itself
    pub stream: S,
    /// Bytes already read from `stream` past the request head
    pub read_buf: BytesMut,
}

impl<S> Upgraded<S> {
    /// Wrap a stream and its already-read bytes.
    pub fn new(stream: S, read_buf: BytesMut) -> Self {
        Self { stream, read_buf }
    }
}

/// One-shot slot holding the stream behind a request.
///
/// Stored in request extensions, which must be `Clone`; clones share the
/// slot, and only the first [`take`](Transport::take) gets the stream.
pub struct Transport<S>(Arc<Mutex<Option<Upgraded<S>>>>);

impl<S> Transport<S> {
    /// Put a stream into a fresh slot.
    pub fn new(upgraded: Upgraded<S>) -> Self {
        Self(Arc::new(Mutex::new(Some(upgraded))))
    }

    /// Remove the stream from the slot.
    pub fn take(&self) -> Option<Upgraded<S>> {
        self.0.lock().take()
    }
}

impl<S> Clone for Transport<S> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// Extension trait for http::Request
///
/// Access to the socket addresses of the request and to the transport that
/// can be taken over for a protocol switch.
pub trait RequestExt {
    /// Get socket info from request extensions
    fn socket_info(&self) -> Option<&SocketInfo>;

    /// Set socket info in request extensions
    fn set_socket_info(&mut self, info: SocketInfo);

    /// Attach the transport the request was read from
    fn set_transport<S: Send + 'static>(&mut self, transport: Transport<S>);

    /// Take the raw stream out of the request, if it is still there
    fn take_transport<S: Send + 'static>(&self) -> Option<Upgraded<S>>;
}

impl<T> RequestExt for http::Request<T> {
    fn socket_info(&self) -> Option<&SocketInfo> {
        self.extensions().get::<SocketInfo>()
    }

    fn set_socket_info(&mut self, info: SocketInfo) {
        self.extensions_mut().insert(info);
    }

    fn set_transport<S: Send + 'static>(&mut self, transport: Transport<S>) {
        self.extensions_mut().insert(transport);
    }

    fn take_transport<S: Send + 'static>(&self) -> Option<Upgraded<S>> {
        self.extensions().get::<Transport<S>>()?.take()
    }
}

/// Read one request head from `stream`.
///
/// Bytes following the blank line that ends the head are left in `buf`.
pub async fn read_request_head<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    max_size: usize,
) -> Result<Request, HttpError>
where
    S: AsyncRead + Unpin,
{
    let mut searched = 0;
    loop {
        if let Some(end) = find_head_end(buf, searched) {
            if end > max_size {
                return Err(HttpError::HeadTooLarge(max_size));
            }
            let head = buf.split_to(end);
            return parse_request_head(&head);
        }
        if buf.len() >= max_size {
            return Err(HttpError::HeadTooLarge(max_size));
        }

        // The terminator may straddle two reads
        searched = buf.len().saturating_sub(3);
        if stream.read_buf(buf).await? == 0 {
            return Err(HttpError::Closed);
        }
    }
}

fn find_head_end(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| from + pos + 4)
}

fn parse_request_head(head: &[u8]) -> Result<Request, HttpError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| HttpError::Malformed("request head is not UTF-8".to_string()))?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ');
    let (method, uri, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(uri), Some(version), None) if !method.is_empty() => {
            (method, uri, version)
        }
        _ => {
            return Err(HttpError::Malformed(format!(
                "bad request line: {request_line:?}"
            )));
        }
    };
    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        other => {
            return Err(HttpError::Malformed(format!("unsupported version: {other:?}")));
        }
    };

    let mut builder = http::Request::builder()
        .method(method)
        .uri(uri)
        .version(version);
    for line in lines.filter(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::Malformed(format!("bad header line: {line:?}")))?;
        builder = builder.header(name.trim(), value.trim());
    }

    Ok(builder.body(())?)
}

/// Build a plain-text error response that closes the connection.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    let mut response = http::Response::new(format!("{message}\n"));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Serialize `response` as an HTTP/1.1 message and flush it.
///
/// A `Content-Length` header is added for non-empty bodies that lack one.
pub async fn write_response<S>(stream: &mut S, response: &Response) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let status = response.status();
    let mut out = BytesMut::with_capacity(256 + response.body().len());
    out.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );
    for (name, value) in response.headers() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if !response.body().is_empty() && !response.headers().contains_key(CONTENT_LENGTH) {
        out.extend_from_slice(format!("content-length: {}\r\n", response.body().len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(response.body().as_bytes());

    stream.write_all(&out).await?;
    stream.flush().await
}
