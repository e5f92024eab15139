//! Minimal masking WebSocket client for loopback tests.

use crate::handshake::accept_key;
use crate::server::Server;
use crate::websocket::{FrameReader, WebSocketCodec, WebSocketFrame, WebSocketOpcode};
use crate::{ServerConfig, ServerError};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) const CLIENT_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub(crate) const MASK: [u8; 4] = [0x11, 0x22, 0x33, 0x44];
pub(crate) const WAIT: Duration = Duration::from_secs(3);

pub(crate) fn upgrade_head(path: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {CLIENT_KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
}

/// Send raw bytes and read back one response head.
///
/// Returns the head text, the stream, and whatever followed the head.
pub(crate) async fn raw_request(addr: SocketAddr, raw: &[u8]) -> (String, TcpStream, BytesMut) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let (head, rest) = read_response_head(&mut stream).await;
    (head, stream, rest)
}

/// Read up to the blank line ending a response head.
///
/// Returns the head text and whatever followed it.
pub(crate) async fn read_response_head<R>(reader: &mut R) -> (String, BytesMut)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::new();
    let end = tokio::time::timeout(WAIT, async {
        loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                return pos + 4;
            }
            let n = reader.read_buf(&mut buf).await.unwrap();
            assert!(n > 0, "server closed before sending a response head");
        }
    })
    .await
    .expect("timed out waiting for response head");

    let head = buf.split_to(end);
    (String::from_utf8(head.to_vec()).unwrap(), buf)
}

pub(crate) struct TestClient {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub(crate) async fn connect(addr: SocketAddr) -> Self {
        Self::connect_with(addr, upgrade_head("/ws").as_bytes()).await
    }

    /// Upgrade with a custom request, which may carry frames after the head.
    pub(crate) async fn connect_with(addr: SocketAddr, raw: &[u8]) -> Self {
        let (head, stream, leftover) = raw_request(addr, raw).await;
        assert!(
            head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"),
            "unexpected response: {head}"
        );
        assert!(head.contains(&format!("Sec-WebSocket-Accept: {}\r\n", accept_key(CLIENT_KEY))));

        let (read_half, writer) = stream.into_split();
        TestClient {
            reader: FrameReader::with_prefix(
                read_half,
                WebSocketCodec::with_max_payload(64 << 20),
                leftover,
            ),
            writer,
        }
    }

    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    pub(crate) async fn send_frame(&mut self, frame: WebSocketFrame, masked: bool) {
        let encoded = frame.encode(masked.then_some(MASK));
        self.send_raw(&encoded).await;
    }

    pub(crate) async fn send_text(&mut self, text: &str) {
        self.send_frame(WebSocketFrame::new_text(text), true).await;
    }

    pub(crate) async fn next_frame(&mut self) -> WebSocketFrame {
        tokio::time::timeout(WAIT, self.reader.read_frame())
            .await
            .expect("timed out waiting for a frame")
            .expect("frame error")
            .expect("connection closed")
    }

    pub(crate) async fn next_text(&mut self) -> String {
        let frame = self.next_frame().await;
        assert_eq!(frame.opcode, WebSocketOpcode::Text);
        assert!(!frame.masked, "server frames must not be masked");
        String::from_utf8(frame.payload).unwrap()
    }

    /// Assert nothing arrives for `quiet`.
    pub(crate) async fn expect_silence(&mut self, quiet: Duration) {
        if let Ok(result) = tokio::time::timeout(quiet, self.reader.read_frame()).await {
            panic!("expected no traffic, got {result:?}");
        }
    }

    /// Assert the server ends the stream.
    pub(crate) async fn expect_closed(&mut self) {
        let result = tokio::time::timeout(WAIT, self.reader.read_frame())
            .await
            .expect("timed out waiting for the server to close");
        assert!(
            !matches!(result, Ok(Some(_))),
            "expected the stream to end, got {result:?}"
        );
    }
}

/// Poll `condition` until it holds or [`WAIT`] runs out.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub(crate) struct Running {
    pub(crate) server: Server,
    pub(crate) addr: SocketAddr,
    pub(crate) ctx: CancellationToken,
    pub(crate) task: JoinHandle<Result<(), ServerError>>,
}

/// Bind on an ephemeral loopback port and serve in the background.
pub(crate) async fn start(config: ServerConfig) -> Running {
    let server = Server::new(ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        ..config
    });
    let listener = server.bind().await.unwrap();
    let addr = server.addr().unwrap();
    let ctx = CancellationToken::new();

    let task = {
        let server = server.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { server.serve(listener, ctx).await })
    };

    Running {
        server,
        addr,
        ctx,
        task,
    }
}
