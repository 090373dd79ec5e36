//! Nickname chat relay - Entry Point
//!
//! Parses the command line, starts the Dispatcher actor and accepts connections.

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nick_relay::{serve, Config, Dispatcher};

/// Channel buffer size for dispatcher commands
const CHANNEL_BUFFER_SIZE: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=nick_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("nick_relay=info")),
        )
        .init();

    let config = Config::parse();

    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!("Chat relay listening on {}", listener.local_addr()?);

    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    tokio::spawn(Dispatcher::new(cmd_rx).run());

    serve(listener, cmd_tx).await;

    Ok(())
}
