//! Message protocol definitions
//!
//! Newline-delimited text protocol. Client lines have the shape
//! `COMMAND:rest`; server lines are `OK:...` or `ERR:...` followed by a
//! fixed retry-later line.

use crate::error::ProtocolError;

/// Second line sent after every `ERR:` line
pub const RETRY_LATER: &str = "por favor intente mas tarde";

/// Client → Server command
///
/// Closed set of commands; anything unrecognised becomes `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Register or rename to `nick`
    Register { nick: String },
    /// Broadcast `text` under the caller's nickname
    Chat { text: String },
    /// Unregister and close the connection
    Unregister,
    /// Any other command token
    Unknown { command: String },
}

impl ClientCommand {
    /// Parse one protocol line
    ///
    /// Returns `None` for malformed lines (no `:` separator), which callers
    /// drop without a response. A bare `UNREGISTER` is accepted.
    pub fn parse(line: &str) -> Option<Self> {
        let Some((command, rest)) = line.split_once(':') else {
            return (line == "UNREGISTER").then_some(ClientCommand::Unregister);
        };

        let cmd = match command {
            "REGISTER" => {
                // Anything after a second ':' is ignored
                let nick = rest.split(':').next().unwrap_or_default();
                ClientCommand::Register {
                    nick: nick.to_string(),
                }
            }
            "CHAT" => ClientCommand::Chat {
                text: rest.to_string(),
            },
            "UNREGISTER" => ClientCommand::Unregister,
            other => ClientCommand::Unknown {
                command: other.to_string(),
            },
        };
        Some(cmd)
    }
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Registration or rename succeeded
    NickAccepted { nick: String },
    /// Chat line relayed from `from`
    Chat { from: String, text: String },
    /// Error reported to a single client
    Error { context: String, message: String },
}

impl ServerMessage {
    /// Render the wire lines for this message (without terminators)
    pub fn lines(&self) -> Vec<String> {
        match self {
            ServerMessage::NickAccepted { nick } => vec![format!("OK:NICK:{}", nick)],
            ServerMessage::Chat { from, text } => vec![format!("OK:CHAT:{}:{}", from, text)],
            ServerMessage::Error { context, message } => vec![
                format!("ERR:{}:{}", context, message),
                RETRY_LATER.to_string(),
            ],
        }
    }
}

/// Convert ProtocolError to ServerMessage for client notification
impl From<ProtocolError> for ServerMessage {
    fn from(err: ProtocolError) -> Self {
        ServerMessage::Error {
            context: err.context().to_string(),
            message: err.to_string(),
        }
    }
}
