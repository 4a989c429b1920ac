use anyhow::Result;
use clap::Parser;
use tracing::info;

mod bridge;
mod config;
mod context;
mod error;
mod mcp;
mod oneshot;
mod references;
mod tmux;

use bridge::GeminiBridge;
use config::{Config, TransportKind};
use mcp::McpServer;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    info!(
        transport = ?config.transport,
        binary = %config.gemini_bin,
        "Starting gemini-bridge"
    );

    let mut bridge = GeminiBridge::from_config(&config)?;
    if config.transport == TransportKind::Session && !config.skip_cleanup {
        bridge.startup_cleanup().await;
    }

    let mut server = McpServer::new(bridge);
    server.run().await
}
