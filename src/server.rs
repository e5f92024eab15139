//! Upgrade endpoint, connection lifecycle and broadcast.
//!
//! A [`Server`] accepts TCP connections, reads one HTTP request head from
//! each, and upgrades requests for the configured path to WebSocket
//! connections. Each upgraded connection gets a read loop task; writes go
//! through the connection's own lock so the read loop, broadcasts and
//! shutdown never interleave frames.

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionId};
use crate::envelope::{Envelope, MessageType};
use crate::error::ServerError;
use crate::handler::MessageHandler;
use crate::handshake::{self, HandshakeError};
use crate::registry::Registry;
use crate::transport::{
    MAX_HEAD_SIZE, Request, RequestExt, SocketInfo, Transport, Upgraded, error_response,
    read_request_head, write_response,
};
use crate::websocket::{FrameReader, WebSocketCodec, WebSocketFrame, WebSocketOpcode};
use bytes::BytesMut;
use futures_util::future::join_all;
use http::StatusCode;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const LINGER: Duration = Duration::from_millis(500);

struct Inner {
    config: ServerConfig,
    registry: Registry,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    /// Ends the accept loop and pending request heads
    shutdown: CancellationToken,
    /// Set by stop() only; connections registering afterwards close at once
    stopped: CancellationToken,
    handshakes: TaskTracker,
}

/// WebSocket broadcast server for display clients.
///
/// Cheap to clone; clones share the same listener state and registry.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// A server that is configured but not yet listening.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Registry::new(),
                handler: RwLock::new(None),
                local_addr: Mutex::new(None),
                shutdown: CancellationToken::new(),
                stopped: CancellationToken::new(),
                handshakes: TaskTracker::new(),
            }),
        }
    }

    /// The configuration this server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Install the handler for inbound application messages.
    ///
    /// Replaces any previous handler. Messages that arrive while no handler
    /// is installed are dropped.
    pub fn set_handler<H>(&self, handler: H)
    where
        H: MessageHandler + 'static,
    {
        *self.inner.handler.write() = Some(Arc::new(handler));
    }

    /// Bind the configured listen address.
    ///
    /// After this returns, [`addr`](Server::addr) reports the bound address,
    /// which is how callers learn an ephemeral port.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let listen_addr = &self.inner.config.listen_addr;
        let bind_error = |source| ServerError::Bind {
            addr: listen_addr.clone(),
            source,
        };
        let listener = TcpListener::bind(listen_addr).await.map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;

        *self.inner.local_addr.lock() = Some(addr);
        info!(%addr, path = %self.inner.config.path, "listening for display clients");
        Ok(listener)
    }

    /// Bind and serve until `ctx` is cancelled or [`stop`](Server::stop) is called.
    pub async fn start(&self, ctx: CancellationToken) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener, ctx).await
    }

    /// Accept connections on `listener` until `ctx` is cancelled or
    /// [`stop`](Server::stop) is called.
    ///
    /// On the way out the listener is closed and in-flight handshakes get
    /// [`shutdown_grace`](ServerConfig::shutdown_grace) to finish.
    /// Connections that already upgraded stay open; `stop` closes them.
    pub async fn serve(
        &self,
        listener: TcpListener,
        ctx: CancellationToken,
    ) -> Result<(), ServerError> {
        let result = loop {
            let (stream, remote_addr) = tokio::select! {
                _ = ctx.cancelled() => break Ok(()),
                _ = self.inner.shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) if is_transient(&err) => {
                        debug!(error = %err, "transient accept error");
                        continue;
                    }
                    Err(err) => break Err(ServerError::Accept(err)),
                },
            };

            let server = self.clone();
            self.inner.handshakes.spawn(async move {
                server.handle_http(stream, remote_addr).await;
            });
        };

        drop(listener);
        self.inner.shutdown.cancel();
        info!("listener closed");

        let drained = self.drain_handshakes().await;
        result.and(drained)
    }

    /// Stop accepting, close every connection, and wait for in-flight
    /// handshakes to finish within the grace period.
    ///
    /// A stopped server cannot be started again.
    pub async fn stop(&self) -> Result<(), ServerError> {
        self.inner.stopped.cancel();
        self.inner.shutdown.cancel();

        let connections = self.inner.registry.drain();
        info!(clients = connections.len(), "stopping server");
        let results = join_all(connections.iter().map(|connection| connection.close())).await;
        for (connection, result) in connections.iter().zip(results) {
            if let Err(err) = result {
                debug!(connection_id = %connection.id(), error = %err, "error closing connection");
            }
        }

        self.drain_handshakes().await
    }

    /// Send `envelope` to every registered connection and cache it for
    /// clients that connect later.
    ///
    /// The envelope is serialized and framed once. A failed write to one
    /// client is logged and does not affect the others; that client is
    /// removed by its own read loop when the socket dies.
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<(), ServerError> {
        let frame = WebSocketFrame::new_text(envelope.to_json()?).encode(None);
        let targets = self
            .inner
            .registry
            .cache_and_snapshot(envelope.clone(), frame.clone());

        let writes = targets.iter().map(|connection| connection.write_encoded(&frame));
        let results = join_all(writes).await;
        let mut failed = 0;
        for (connection, result) in targets.iter().zip(results) {
            if let Err(err) = result {
                failed += 1;
                warn!(connection_id = %connection.id(), error = %err, "broadcast write failed");
            }
        }

        debug!(kind = %envelope.kind, clients = targets.len(), failed, "broadcast sent");
        Ok(())
    }

    /// Broadcast `state` as a `ui_update` envelope.
    pub async fn publish<T>(&self, state: &T) -> Result<(), ServerError>
    where
        T: Serialize + ?Sized,
    {
        let envelope = Envelope::with_payload(MessageType::UiUpdate, state)?;
        self.broadcast(&envelope).await
    }

    /// The envelope that a newly connected client will be sent first.
    pub fn last_broadcast(&self) -> Option<Envelope> {
        self.inner.registry.last_broadcast()
    }

    /// Number of registered connections.
    pub fn client_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Bound listen address, once [`bind`](Server::bind) has succeeded.
    pub fn addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Upgrade a request read by some other HTTP front end.
    ///
    /// The request must carry its stream as a [`Transport<S>`] extension.
    /// On success the `101` has been written and the connection is handed to
    /// its own task, which registers it, replays the cached broadcast, and
    /// runs its read loop. On a rejection the stream is left in the transport
    /// so the caller can answer with [`HandshakeError::status_code`].
    pub async fn upgrade<S>(&self, request: &Request) -> Result<ConnectionId, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let remote_addr = request.socket_info().and_then(|info| info.remote);
        let upgraded = handshake::negotiate::<S>(request).await?;
        Ok(self.accept(upgraded, remote_addr))
    }

    async fn handle_http(self, mut stream: TcpStream, remote_addr: SocketAddr) {
        let mut buf = BytesMut::with_capacity(1024);
        let head = tokio::select! {
            _ = self.inner.shutdown.cancelled() => return,
            head = tokio::time::timeout(
                self.inner.config.header_read_timeout,
                read_request_head(&mut stream, &mut buf, MAX_HEAD_SIZE),
            ) => head,
        };

        let mut request = match head {
            Ok(Ok(request)) => request,
            Ok(Err(err)) => {
                debug!(%remote_addr, error = %err, "unreadable request head");
                if let Some(status) = err.status_code() {
                    respond(&mut stream, status, &err.to_string()).await;
                    linger(&mut stream).await;
                }
                return;
            }
            Err(_) => {
                debug!(%remote_addr, "timed out waiting for request head");
                return;
            }
        };

        if request.uri().path() != self.inner.config.path {
            debug!(%remote_addr, path = request.uri().path(), "no route");
            respond(&mut stream, StatusCode::NOT_FOUND, "not found").await;
            return;
        }

        request.set_socket_info(SocketInfo::new(stream.local_addr().ok(), Some(remote_addr)));
        let transport = Transport::new(Upgraded::new(stream, buf));
        request.set_transport(transport.clone());

        if let Err(err) = self.upgrade::<TcpStream>(&request).await {
            warn!(%remote_addr, error = %err, "upgrade rejected");
            if let (Some(status), Some(mut upgraded)) = (err.status_code(), transport.take()) {
                respond(&mut upgraded.stream, status, &err.to_string()).await;
            }
        }
    }

    fn accept<S>(&self, upgraded: Upgraded<S>, remote_addr: Option<SocketAddr>) -> ConnectionId
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let Upgraded { stream, read_buf } = upgraded;
        let (read_half, write_half) = tokio::io::split(stream);

        let id = ConnectionId::new();
        let connection = Arc::new(Connection::new(id, remote_addr, write_half));
        let reader = FrameReader::with_prefix(
            read_half,
            WebSocketCodec::with_max_payload(self.inner.config.max_frame_size),
            read_buf,
        );

        // Untracked: a taken-over connection is not part of the HTTP shutdown
        tokio::spawn(self.clone().run_connection(connection, reader));
        id
    }

    /// Register, replay the last broadcast, then serve frames until the
    /// connection ends.
    async fn run_connection<R>(self, connection: Arc<Connection>, reader: FrameReader<R>)
    where
        R: AsyncRead + Unpin,
    {
        let id = connection.id();
        {
            // Registered and replayed under the write lock: a broadcast that
            // sees this connection queues behind the replay.
            let mut writer = connection.lock().await;
            if let Some(frame) = self.inner.registry.register(Arc::clone(&connection)) {
                if let Err(err) = writer.write_encoded(&frame).await {
                    warn!(connection_id = %id, error = %err, "failed to replay last broadcast");
                }
            }
        }

        if self.inner.stopped.is_cancelled() {
            // Lost the race with stop(), which has already drained the registry
            self.inner.registry.remove(id);
            if let Err(err) = connection.close().await {
                debug!(connection_id = %id, error = %err, "error closing connection");
            }
            return;
        }

        info!(
            connection_id = %id,
            remote_addr = ?connection.remote_addr(),
            clients = self.inner.registry.len(),
            "client connected"
        );

        self.read_loop(connection, reader).await;
    }

    async fn read_loop<R>(self, connection: Arc<Connection>, mut reader: FrameReader<R>)
    where
        R: AsyncRead + Unpin,
    {
        let id = connection.id();

        loop {
            let frame = tokio::select! {
                _ = connection.closed() => break,
                frame = reader.read_frame() => frame,
            };

            let frame = match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!(connection_id = %id, "client ended the stream");
                    break;
                }
                Err(err) => {
                    warn!(connection_id = %id, error = %err, "dropping connection");
                    break;
                }
            };

            match frame.opcode {
                WebSocketOpcode::Text => self.dispatch(&connection, &frame.payload).await,
                WebSocketOpcode::Ping => {
                    if let Err(err) = connection.write_pong(&frame.payload).await {
                        debug!(connection_id = %id, error = %err, "failed to answer ping");
                    }
                }
                WebSocketOpcode::Close => {
                    debug!(connection_id = %id, code = ?frame.close_code(), "client sent close");
                    break;
                }
                WebSocketOpcode::Pong => {}
                opcode => {
                    debug!(connection_id = %id, ?opcode, "ignoring unsupported frame");
                }
            }
        }

        self.inner.registry.remove(id);
        if let Err(err) = connection.close().await {
            debug!(connection_id = %id, error = %err, "error closing connection");
        }
        info!(
            connection_id = %id,
            clients = self.inner.registry.len(),
            "client disconnected"
        );
    }

    async fn dispatch(&self, connection: &Connection, payload: &[u8]) {
        let id = connection.id();
        let envelope = match Envelope::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(connection_id = %id, error = %err, "ignoring malformed message");
                return;
            }
        };

        if envelope.kind == MessageType::Ping {
            let result = match Envelope::pong().to_json() {
                Ok(pong) => connection.write_text(&pong).await,
                Err(err) => {
                    warn!(error = %err, "failed to encode pong");
                    return;
                }
            };
            if let Err(err) = result {
                debug!(connection_id = %id, error = %err, "failed to answer keepalive");
            }
            return;
        }

        let handler = self.inner.handler.read().clone();
        match handler {
            Some(handler) => handler.handle(id, envelope),
            None => debug!(connection_id = %id, kind = %envelope.kind, "no handler installed"),
        }
    }

    async fn drain_handshakes(&self) -> Result<(), ServerError> {
        self.inner.handshakes.close();
        let grace = self.inner.config.shutdown_grace;
        tokio::time::timeout(grace, self.inner.handshakes.wait())
            .await
            .map_err(|_| ServerError::ShutdownTimeout(grace))
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.inner.config)
            .field("addr", &self.addr())
            .field("clients", &self.client_count())
            .finish()
    }
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    )
}

async fn respond<S>(stream: &mut S, status: StatusCode, message: &str)
where
    S: AsyncWrite + Unpin,
{
    if let Err(err) = write_response(stream, &error_response(status, message)).await {
        debug!(error = %err, %status, "failed to write error response");
    }
}

/// Half-close and discard what the client is still sending, so unread
/// request bytes do not turn the close into a reset that eats the response.
async fn linger(stream: &mut TcpStream) {
    if stream.shutdown().await.is_err() {
        return;
    }
    let mut discard = [0u8; 1024];
    let _ = tokio::time::timeout(LINGER, async {
        while matches!(stream.read(&mut discard).await, Ok(n) if n > 0) {}
    })
    .await;
}
