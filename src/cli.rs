use clap::Parser;
use display_socket::ServerConfig;
use display_socket::config::{DEFAULT_LISTEN_ADDR, DEFAULT_PATH};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "display-socket",
    version,
    about = "Broadcast JSON UI state read from stdin to WebSocket display clients"
)]
pub struct Cli {
    /// Listen address
    #[arg(short, long, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: String,

    /// Request path that accepts WebSocket upgrades
    #[arg(long, default_value = DEFAULT_PATH)]
    pub path: String,

    /// Largest frame payload accepted from a client, in bytes
    #[arg(long, default_value_t = display_socket::websocket::DEFAULT_MAX_PAYLOAD)]
    pub max_frame_size: usize,

    /// Seconds to wait for in-flight handshakes on shutdown
    #[arg(long, default_value_t = 5)]
    pub shutdown_grace: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(&self.listen)
            .with_path(&self.path)
            .with_max_frame_size(self.max_frame_size)
            .with_shutdown_grace(Duration::from_secs(self.shutdown_grace))
    }
}
