//! One upgraded client socket and the lock that serializes writes to it.

use crate::websocket::{WebSocketError, WebSocketOpcode, write_frame};
use std::fmt;
use std::net::SocketAddr;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque identifier of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct WriteState {
    sink: BufWriter<BoxedWriter>,
    closed: bool,
}

/// The write side of one client connection.
///
/// Every frame goes out under one mutex, so concurrent writers (a broadcast
/// and a pong, say) can never interleave bytes inside a frame. The same lock
/// guards the closed flag.
///
/// The read side is not stored here: it lives in the connection's read loop,
/// which watches [`closed`](Connection::closed) to stop when the connection
/// is closed from elsewhere.
pub struct Connection {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    writer: Mutex<WriteState>,
    shutdown: CancellationToken,
}

impl Connection {
    /// Wrap the write half of an upgraded socket.
    pub fn new<W>(id: ConnectionId, remote_addr: Option<SocketAddr>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            remote_addr,
            writer: Mutex::new(WriteState {
                sink: BufWriter::new(Box::new(writer)),
                closed: false,
            }),
            shutdown: CancellationToken::new(),
        }
    }

    /// This connection's id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Peer address, when the socket has one.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Send a text frame.
    pub async fn write_text(&self, text: &str) -> Result<(), WebSocketError> {
        self.lock().await.write_frame(WebSocketOpcode::Text, text.as_bytes()).await
    }

    /// Send a pong frame echoing `payload`.
    pub async fn write_pong(&self, payload: &[u8]) -> Result<(), WebSocketError> {
        self.lock().await.write_frame(WebSocketOpcode::Pong, payload).await
    }

    /// Send a frame that was encoded once for many connections.
    pub async fn write_encoded(&self, frame: &[u8]) -> Result<(), WebSocketError> {
        self.lock().await.write_encoded(frame).await
    }

    /// Take the write lock, for a sequence of writes nothing may come between.
    pub(crate) async fn lock(&self) -> ConnectionWriter<'_> {
        ConnectionWriter {
            state: self.writer.lock().await,
            shutdown: &self.shutdown,
        }
    }

    /// Close the connection. Idempotent.
    ///
    /// Wakes the read loop and any writer stuck on a peer that stopped
    /// reading, then shuts the socket down. Only the first call does the
    /// shutdown; later calls return `Ok(())`.
    pub async fn close(&self) -> Result<(), WebSocketError> {
        self.shutdown.cancel();

        let mut state = self.writer.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        // Skip the BufWriter flush: a half-written frame is not worth blocking on
        state.sink.get_mut().shutdown().await?;
        Ok(())
    }

    /// Whether [`close`](Connection::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Completes once [`close`](Connection::close) has been called.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Held write lock of a [`Connection`].
pub(crate) struct ConnectionWriter<'a> {
    state: MutexGuard<'a, WriteState>,
    shutdown: &'a CancellationToken,
}

impl ConnectionWriter<'_> {
    pub(crate) async fn write_frame(
        &mut self,
        opcode: WebSocketOpcode,
        payload: &[u8],
    ) -> Result<(), WebSocketError> {
        if self.state.closed {
            return Err(WebSocketError::ConnectionClosed);
        }
        let shutdown = self.shutdown;
        let sink = &mut self.state.sink;
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(WebSocketError::ConnectionClosed),
            result = write_frame(sink, opcode, payload) => result,
        }
    }

    pub(crate) async fn write_encoded(&mut self, frame: &[u8]) -> Result<(), WebSocketError> {
        if self.state.closed {
            return Err(WebSocketError::ConnectionClosed);
        }
        let shutdown = self.shutdown;
        let sink = &mut self.state.sink;
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(WebSocketError::ConnectionClosed),
            result = async {
                sink.write_all(frame).await?;
                sink.flush().await
            } => result.map_err(WebSocketError::from),
        }
    }
}
