//! Error types for the relay
//!
//! Splits errors into protocol errors (reported to the offending client,
//! connection stays usable) and transport errors (end one connection task).
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Recoverable protocol errors
///
/// Each one is answered with an `ERR:` line plus the retry-later line,
/// sent only to the connection that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Requested nickname is empty or already registered
    #[error("Nick already exists. Use another nick")]
    NickTaken,

    /// CHAT sent before a successful REGISTER
    #[error("Unregistered user! register first.")]
    Unregistered,

    /// Command token is not REGISTER, CHAT or UNREGISTER
    #[error("Unknown command")]
    UnknownCommand(String),
}

impl ProtocolError {
    /// The `<context>` field of the `ERR:<context>:<message>` line
    pub fn context(&self) -> &str {
        match self {
            ProtocolError::NickTaken => "NICK",
            ProtocolError::Unregistered => "CHAT",
            ProtocolError::UnknownCommand(command) => command,
        }
    }
}

/// Application-level errors
///
/// Fatal for the connection they occur on, never for the server.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Line framing error
    #[error("Line codec error: {0}")]
    Codec(#[from] LinesCodecError),

    /// Channel send error (fatal - dispatcher is gone)
    #[error("Channel send error")]
    ChannelSend,
}

/// Message send errors
///
/// Occurs when attempting to queue lines for a connection whose writer has exited.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The peer is not draining its queue
    #[error("Outbound queue full")]
    QueueFull,
}
