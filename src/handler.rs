//! Handler trait for inbound client messages
//!
//! The server decodes every text frame into an [`Envelope`], answers
//! keepalives itself, and hands everything else to one [`MessageHandler`]
//! together with the id of the connection it came from.
//!
//! # Examples
//!
//! ## A closure
//!
//! ```
//! use display_socket::{ConnectionId, Envelope, Server, ServerConfig};
//!
//! let server = Server::new(ServerConfig::default());
//! server.set_handler(|connection_id: ConnectionId, envelope: Envelope| {
//!     println!("{connection_id}: {}", envelope.kind);
//! });
//! ```
//!
//! ## A channel, for handlers that do slow work
//!
//! ```
//! use display_socket::{ConnectionId, Envelope, Server, ServerConfig};
//! use tokio::sync::mpsc;
//!
//! let server = Server::new(ServerConfig::default());
//! let (tx, _rx) = mpsc::unbounded_channel::<(ConnectionId, Envelope)>();
//! server.set_handler(tx);
//!
//! # async fn consume(mut rx: mpsc::UnboundedReceiver<(ConnectionId, Envelope)>) {
//! while let Some((connection_id, envelope)) = rx.recv().await {
//!     // score the interaction, update preferences, ...
//! #   let _ = (connection_id, envelope);
//! }
//! # }
//! ```

use crate::connection::ConnectionId;
use crate::envelope::Envelope;
use tokio::sync::mpsc;

/// Receives every application message read from a client.
///
/// Called from the connection's read loop, so it must not block; anything
/// slow belongs behind a channel (see the `UnboundedSender` impl).
pub trait MessageHandler: Send + Sync {
    /// Handle one inbound envelope from `connection_id`.
    fn handle(&self, connection_id: ConnectionId, envelope: Envelope);
}

impl<F> MessageHandler for F
where
    F: Fn(ConnectionId, Envelope) + Send + Sync,
{
    fn handle(&self, connection_id: ConnectionId, envelope: Envelope) {
        self(connection_id, envelope)
    }
}

impl MessageHandler for mpsc::UnboundedSender<(ConnectionId, Envelope)> {
    fn handle(&self, connection_id: ConnectionId, envelope: Envelope) {
        if self.send((connection_id, envelope)).is_err() {
            tracing::debug!(%connection_id, "inbound receiver dropped, message discarded");
        }
    }
}
