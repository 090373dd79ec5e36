//! Connection handle and per-connection session state
//!
//! A `ClientHandle` addresses outbound lines to one connection. The
//! dispatcher pairs each handle with a `Session` that tracks its nickname.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::ClientId;

/// Item queued for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write the message's lines
    Message(ServerMessage),
    /// Flush and close the connection
    Close,
}

/// Handle used to send lines to a single connection
///
/// Cloning is cheap; every clone feeds the same writer task. Sends never
/// wait: a full queue is reported as `SendError::QueueFull` so the caller
/// can drop the peer instead of stalling.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Dispatcher → writer task queue
    sender: mpsc::Sender<Outbound>,
    /// Cancelled to tear the connection down without going through the queue
    shutdown: CancellationToken,
}

impl ClientHandle {
    /// Create a new handle with the given ID and outbound queue
    pub fn new(id: ClientId, sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            sender,
            shutdown: CancellationToken::new(),
        }
    }

    /// Queue a message for this connection
    pub fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.push(Outbound::Message(msg))
    }

    /// Ask the writer task to close the connection after pending lines
    pub fn close(&self) -> Result<(), SendError> {
        self.push(Outbound::Close)
    }

    /// Close the connection immediately, discarding queued lines
    pub fn abort(&self) {
        self.shutdown.cancel();
    }

    /// Token the connection task watches for `abort`
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn push(&self, item: Outbound) -> Result<(), SendError> {
        self.sender.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }
}

/// Protocol state of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No nickname yet (initial state)
    Unregistered,
    /// Registered under the given nickname
    Registered(String),
}

/// Dispatcher-owned state for one live connection
#[derive(Debug)]
pub struct Session {
    pub handle: ClientHandle,
    pub state: SessionState,
}

impl Session {
    /// Create an unregistered session for a new connection
    pub fn new(handle: ClientHandle) -> Self {
        Self {
            handle,
            state: SessionState::Unregistered,
        }
    }

    /// Current nickname, if registered
    pub fn nick(&self) -> Option<&str> {
        match &self.state {
            SessionState::Registered(nick) => Some(nick),
            SessionState::Unregistered => None,
        }
    }
}
