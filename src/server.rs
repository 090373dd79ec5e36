//! Listener accept loop
//!
//! Accepts TCP connections and spawns a handler task for each one.

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::dispatcher::DispatchCommand;
use crate::handler::handle_connection;

/// Accept connections forever, handing each one to `handle_connection`
///
/// Accept errors are logged and the loop keeps going.
pub async fn serve(listener: TcpListener, cmd_tx: mpsc::Sender<DispatchCommand>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Accepted connection from {}", addr);
                let cmd_tx = cmd_tx.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, cmd_tx).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
