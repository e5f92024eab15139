//! Server-level errors.

use std::time::Duration;

/// Errors returned by [`Server`](crate::Server) operations.
///
/// Per-connection failures (bad frames, write errors) are logged and never
/// surface here; only listener and shutdown problems do.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listen address could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Configured listen address
        addr: String,
        /// Underlying error
        source: std::io::Error,
    },
    /// The listener failed while accepting
    #[error("accept failed: {0}")]
    Accept(std::io::Error),
    /// In-flight handshakes did not finish within the grace period
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
    /// An envelope could not be serialized
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
}
