//! Line-based Chat Relay Library
//!
//! A minimal text-line chat relay built on tokio. Clients register a unique
//! nickname, broadcast chat lines to every registered client, and may
//! unregister to disconnect.
//!
//! # Protocol
//! - `REGISTER:<nick>` → `OK:NICK:<nick>` (also renames a registered client)
//! - `CHAT:<text>` → `OK:CHAT:<nick>:<text>` to every registered client
//! - `UNREGISTER` → connection closed
//! - failures → `ERR:<context>:<message>` then `por favor intente mas tarde`
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Dispatcher` is the central actor owning the nickname `Registry`
//! - Each connection has a `handler` task communicating with the dispatcher
//! - No locks needed - all registry access goes through message passing
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use nick_relay::{serve, Dispatcher};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:4321").await.unwrap();
//!     let (cmd_tx, cmd_rx) = mpsc::channel(256);
//!
//!     tokio::spawn(Dispatcher::new(cmd_rx).run());
//!     serve(listener, cmd_tx).await;
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use client::{ClientHandle, Outbound, Session, SessionState};
pub use codec::RelayCodec;
pub use config::Config;
pub use dispatcher::{DispatchCommand, Dispatcher};
pub use error::{AppError, ProtocolError, SendError};
pub use handler::handle_connection;
pub use message::{ClientCommand, ServerMessage};
pub use registry::Registry;
pub use server::serve;
pub use types::ClientId;
