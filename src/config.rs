//! Server configuration.

use crate::websocket::DEFAULT_MAX_PAYLOAD;
use std::time::Duration;

/// Default address the server listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8765";

/// Default upgrade path.
pub const DEFAULT_PATH: &str = "/ws";

/// Settings for a [`Server`](crate::Server).
///
/// Deployments normally set only the listen address; everything else has a
/// default that matches the display clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// `host:port` to bind; port 0 picks an ephemeral port
    pub listen_addr: String,
    /// Request path that accepts upgrades
    pub path: String,
    /// Largest frame payload accepted from a client
    pub max_frame_size: usize,
    /// Time allowed for a client to send its HTTP request head
    pub header_read_timeout: Duration,
    /// Time allowed for in-flight handshakes once shutdown starts
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    /// Defaults with the given listen address.
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            path: DEFAULT_PATH.to_string(),
            max_frame_size: DEFAULT_MAX_PAYLOAD,
            header_read_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// Override the upgrade path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Override the frame payload cap.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Override the request head timeout.
    pub fn with_header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    /// Override the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LISTEN_ADDR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:8765");
        assert_eq!(config.path, "/ws");
        assert_eq!(config.max_frame_size, 1024 * 1024);
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::new("0.0.0.0:0")
            .with_path("/kiosk")
            .with_max_frame_size(4096)
            .with_header_read_timeout(Duration::from_millis(250))
            .with_shutdown_grace(Duration::from_secs(1));
        assert_eq!(config.listen_addr, "0.0.0.0:0");
        assert_eq!(config.path, "/kiosk");
        assert_eq!(config.max_frame_size, 4096);
        assert_eq!(config.header_read_timeout, Duration::from_millis(250));
        assert_eq!(config.shutdown_grace, Duration::from_secs(1));
    }
}
