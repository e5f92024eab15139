//! WebSocket transport that streams UI state to display clients.
//!
//! The server upgrades plain HTTP/1.1 requests itself, keeps a registry of
//! connected clients, broadcasts JSON [`Envelope`]s to all of them, and
//! replays the most recent broadcast to every client that connects later.
//! Messages coming back from clients are handed to a [`MessageHandler`].

#![warn(clippy::dbg_macro, clippy::print_stdout)]
#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod registry;
pub mod server;
pub mod transport;

/// WebSocket frame codec for the RFC 6455 subset display clients speak
pub mod websocket;

#[cfg(test)]
mod testing;

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionId};
pub use envelope::{Envelope, MessageType};
pub use error::ServerError;
pub use handler::MessageHandler;
pub use handshake::HandshakeError;
pub use registry::Registry;
pub use server::Server;
pub use transport::{HttpError, Request, RequestExt, Response, SocketInfo, Transport, Upgraded};
pub use websocket::{WebSocketError, WebSocketFrame, WebSocketOpcode};
