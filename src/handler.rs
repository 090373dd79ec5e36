//! TCP connection handler
//!
//! Frames a connection into lines and bridges it to the Dispatcher:
//! received lines become `DispatchCommand::Line`, queued `Outbound` items
//! are written back, and the close is reported exactly once.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, error, info};

use crate::client::{ClientHandle, Outbound};
use crate::codec::RelayCodec;
use crate::dispatcher::DispatchCommand;
use crate::error::AppError;
use crate::types::ClientId;

/// Outbound messages buffered per connection before it is dropped as stalled
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

/// Handle a new TCP connection
///
/// Registers the connection with the Dispatcher, runs the read and write
/// halves as separate tasks, and reports the disconnect when either ends
/// or the dispatcher aborts the connection.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<DispatchCommand>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let framed = Framed::new(stream, RelayCodec::default());
    let (mut line_sender, mut line_receiver) = framed.split::<String>();

    let client_id = ClientId::new();
    info!("Client {} connected from {}", client_id, peer_addr);

    // Channel for dispatcher -> client lines
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE_SIZE);
    let handle = ClientHandle::new(client_id, out_tx);
    let shutdown = handle.shutdown_token();

    if cmd_tx.send(DispatchCommand::Connect { handle }).await.is_err() {
        error!("Failed to register client {} - dispatcher closed", client_id);
        return Err(AppError::ChannelSend);
    }

    let cmd_tx_read = cmd_tx.clone();

    // Read task (socket lines -> DispatchCommand)
    let mut read_task = tokio::spawn(async move {
        while let Some(result) = line_receiver.next().await {
            match result {
                Ok(line) => {
                    debug!("Line from {}: {:?}", client_id, line);
                    let cmd = DispatchCommand::Line { client_id, line };
                    if cmd_tx_read.send(cmd).await.is_err() {
                        debug!("Dispatcher closed, ending read task for {}", client_id);
                        break;
                    }
                }
                Err(e) => {
                    error!("Read error for {}: {}", client_id, e);
                    break;
                }
            }
        }
        debug!("Read task ended for {}", client_id);
    });

    // Write task (Outbound -> socket lines)
    let mut write_task = tokio::spawn(async move {
        while let Some(item) = out_rx.recv().await {
            match item {
                Outbound::Message(msg) => {
                    if let Err(e) = write_lines(&mut line_sender, msg.lines()).await {
                        debug!("Send failed for {}: {}, ending write task", client_id, e);
                        break;
                    }
                }
                Outbound::Close => {
                    debug!("Closing connection for {}", client_id);
                    break;
                }
            }
        }

        let _ = line_sender.close().await;
        debug!("Write task ended for {}", client_id);
    });

    // Whichever half finishes first ends the connection
    tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", client_id);
            write_task.abort();
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", client_id);
            read_task.abort();
        }
        _ = shutdown.cancelled() => {
            debug!("Connection for {} aborted by dispatcher", client_id);
            read_task.abort();
            write_task.abort();
        }
    }

    let _ = cmd_tx.send(DispatchCommand::Disconnect { client_id }).await;

    info!("Client {} disconnected", client_id);

    Ok(())
}

/// Write every line of one message, then flush once
async fn write_lines(
    sink: &mut SplitSink<Framed<TcpStream, RelayCodec>, String>,
    lines: Vec<String>,
) -> Result<(), AppError> {
    for line in lines {
        sink.feed(line).await?;
    }
    sink.flush().await?;
    Ok(())
}
