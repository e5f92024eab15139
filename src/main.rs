mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use display_socket::{ConnectionId, Envelope, Server};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Cli;

/// Publish every JSON line read from stdin as a `ui_update`.
///
/// Lines that are not JSON are skipped. Returns when stdin closes.
async fn publish_stdin(server: Server) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let state: serde_json::Value = match serde_json::from_str(line) {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "skipping stdin line that is not JSON");
                continue;
            }
        };
        server.publish(&state).await?;
    }
    info!("stdin closed, serving the last state until interrupted");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    let server = Server::new(cli.server_config());
    server.set_handler(|connection_id: ConnectionId, envelope: Envelope| {
        info!(%connection_id, kind = %envelope.kind, payload = %envelope.payload, "client message");
    });

    let listener = server.bind().await.context("failed to start server")?;
    let ctx = CancellationToken::new();

    let serving = {
        let server = server.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { server.serve(listener, ctx).await })
    };
    let publisher = tokio::spawn(publish_stdin(server.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("interrupted, shutting down");

    ctx.cancel();
    publisher.abort();
    serving.await.context("server task panicked")??;
    server.stop().await?;

    info!("display-socket stopped");
    Ok(())
}
