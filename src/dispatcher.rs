//! Dispatcher actor implementation
//!
//! The single owner of the nickname registry and all per-connection
//! sessions. Connection tasks talk to it over an mpsc channel, so every
//! registry operation is serialized through one event loop.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{ClientHandle, Session, SessionState};
use crate::error::{ProtocolError, SendError};
use crate::message::{ClientCommand, ServerMessage};
use crate::registry::Registry;
use crate::types::ClientId;

/// Events sent from connection handlers to the Dispatcher actor
#[derive(Debug)]
pub enum DispatchCommand {
    /// New connection accepted
    Connect { handle: ClientHandle },
    /// Complete line received on a connection
    Line { client_id: ClientId, line: String },
    /// Connection closed by the transport
    Disconnect { client_id: ClientId },
}

/// The Dispatcher actor
///
/// Interprets protocol lines, mutates the registry and fans chat lines out
/// to every registered connection.
pub struct Dispatcher {
    /// Nickname -> handle mapping
    registry: Registry,
    /// All live connections: ClientId -> Session
    sessions: HashMap<ClientId, Session>,
    /// Command receiver channel
    receiver: mpsc::Receiver<DispatchCommand>,
}

impl Dispatcher {
    /// Create a new Dispatcher with the given command receiver
    pub fn new(receiver: mpsc::Receiver<DispatchCommand>) -> Self {
        Self {
            registry: Registry::new(),
            sessions: HashMap::new(),
            receiver,
        }
    }

    /// Run the Dispatcher event loop
    ///
    /// Processes events one at a time until all senders are dropped.
    pub async fn run(mut self) {
        info!("Dispatcher started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Dispatcher shutting down");
    }

    /// Read-only view of the registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn handle_command(&mut self, cmd: DispatchCommand) {
        match cmd {
            DispatchCommand::Connect { handle } => {
                self.on_connect(handle);
            }
            DispatchCommand::Line { client_id, line } => {
                self.on_line(client_id, &line);
            }
            DispatchCommand::Disconnect { client_id } => {
                self.on_close(client_id);
            }
        }
    }

    /// Track a newly opened connection (starts Unregistered)
    pub fn on_connect(&mut self, handle: ClientHandle) {
        debug!("Session opened for {}", handle.id);
        self.sessions.insert(handle.id, Session::new(handle));
        debug!(
            "Total connections: {}, registered: {}",
            self.sessions.len(),
            self.registry.len()
        );
    }

    /// Process one received line
    pub fn on_line(&mut self, client_id: ClientId, line: &str) {
        if !self.sessions.contains_key(&client_id) {
            debug!("Ignoring line from closed client {}", client_id);
            return;
        }

        let Some(command) = ClientCommand::parse(line) else {
            debug!("Dropping malformed line from {}: {:?}", client_id, line);
            return;
        };

        match command {
            ClientCommand::Register { nick } => self.handle_register(client_id, nick),
            ClientCommand::Chat { text } => self.handle_chat(client_id, text),
            ClientCommand::Unregister => self.handle_unregister(client_id),
            ClientCommand::Unknown { command } => {
                debug!("Unknown command {:?} from {}", command, client_id);
                self.reply(client_id, ProtocolError::UnknownCommand(command).into());
            }
        }
    }

    /// Clean up after the transport closed a connection
    ///
    /// Safe to call after UNREGISTER already removed the session.
    pub fn on_close(&mut self, client_id: ClientId) {
        let Some(session) = self.sessions.remove(&client_id) else {
            return;
        };

        if let Some(nick) = session.nick() {
            self.registry.unregister(nick);
            debug!("Session for {} ({}) closed", client_id, nick);
        } else {
            debug!("Session for {} closed", client_id);
        }
    }

    /// Handle REGISTER: first registration or rename
    fn handle_register(&mut self, client_id: ClientId, nick: String) {
        let Some(session) = self.sessions.get_mut(&client_id) else {
            return;
        };

        let handle = session.handle.clone();
        let result = match &session.state {
            SessionState::Unregistered => self.registry.register(&nick, handle.clone()),
            SessionState::Registered(old) => {
                self.registry.reregister(old, &nick, handle.clone())
            }
        };

        let reply = match result {
            Ok(()) => {
                info!("Client {} registered as '{}'", client_id, nick);
                session.state = SessionState::Registered(nick.clone());
                ServerMessage::NickAccepted { nick }
            }
            Err(e) => {
                debug!("Client {} refused nick '{}': {}", client_id, nick, e);
                e.into()
            }
        };
        self.reply(client_id, reply);
    }

    /// Handle CHAT: broadcast to every registered connection, sender included
    fn handle_chat(&mut self, client_id: ClientId, text: String) {
        let Some(session) = self.sessions.get(&client_id) else {
            return;
        };

        let Some(nick) = session.nick().map(str::to_string) else {
            self.reply(client_id, ProtocolError::Unregistered.into());
            return;
        };

        let recipients = self.registry.all_handles();
        debug!("Broadcasting from '{}' to {} clients", nick, recipients.len());

        let msg = ServerMessage::Chat { from: nick, text };
        let stalled: Vec<ClientId> = recipients
            .iter()
            .filter(|handle| !deliver(handle, msg.clone()))
            .map(|handle| handle.id)
            .collect();

        for id in stalled {
            self.evict(id);
        }
    }

    /// Handle UNREGISTER: drop the nickname and close the connection
    fn handle_unregister(&mut self, client_id: ClientId) {
        let Some(session) = self.sessions.remove(&client_id) else {
            return;
        };

        if let Some(nick) = session.nick() {
            self.registry.unregister(nick);
            info!("Client {} unregistered '{}'", client_id, nick);
        }

        match session.handle.close() {
            Ok(()) => {}
            Err(SendError::QueueFull) => session.handle.abort(),
            Err(SendError::ChannelClosed) => {
                debug!("Client {} already gone before close", client_id);
            }
        }
    }

    fn reply(&mut self, client_id: ClientId, msg: ServerMessage) {
        let Some(session) = self.sessions.get(&client_id) else {
            return;
        };
        if !deliver(&session.handle, msg) {
            self.evict(client_id);
        }
    }

    /// Drop a connection whose outbound queue is full
    ///
    /// The nickname is released at once and the socket is torn down; the
    /// later close event finds no session and does nothing.
    fn evict(&mut self, client_id: ClientId) {
        let Some(session) = self.sessions.get(&client_id) else {
            return;
        };
        warn!("Client {} is not reading its output, dropping it", client_id);
        session.handle.abort();
        self.on_close(client_id);
    }
}

/// Best-effort send; returns false when the peer's queue is full
///
/// A closed queue counts as delivered: the peer's close event cleans up.
fn deliver(handle: &ClientHandle, msg: ServerMessage) -> bool {
    match handle.send(msg) {
        Ok(()) => true,
        Err(SendError::QueueFull) => false,
        Err(SendError::ChannelClosed) => {
            debug!("Dropping message for closed client {}", handle.id);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Outbound;

    struct TestClient {
        id: ClientId,
        rx: mpsc::Receiver<Outbound>,
    }

    impl TestClient {
        /// Drain queued output as wire lines; `Close` shows up as "<close>"
        fn lines(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(item) = self.rx.try_recv() {
                match item {
                    Outbound::Message(msg) => out.extend(msg.lines()),
                    Outbound::Close => out.push("<close>".to_string()),
                }
            }
            out
        }
    }

    fn dispatcher() -> Dispatcher {
        let (_tx, rx) = mpsc::channel(8);
        Dispatcher::new(rx)
    }

    fn connect(dispatcher: &mut Dispatcher) -> TestClient {
        let (tx, rx) = mpsc::channel(64);
        let id = ClientId::new();
        dispatcher.on_connect(ClientHandle::new(id, tx));
        TestClient { id, rx }
    }

    const NICK_ERR: &str = "ERR:NICK:Nick already exists. Use another nick";
    const RETRY: &str = "por favor intente mas tarde";

    #[test]
    fn test_register_ok() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);

        d.on_line(a.id, "REGISTER:alice");

        assert_eq!(a.lines(), vec!["OK:NICK:alice"]);
        assert!(d.registry().contains("alice"));
    }

    #[test]
    fn test_register_taken() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);
        let mut b = connect(&mut d);

        d.on_line(a.id, "REGISTER:alice");
        d.on_line(b.id, "REGISTER:alice");

        assert_eq!(a.lines(), vec!["OK:NICK:alice"]);
        assert_eq!(b.lines(), vec![NICK_ERR, RETRY]);
        assert_eq!(d.registry().nick_of(a.id), Some("alice"));
        assert!(d.registry().nick_of(b.id).is_none());
    }

    #[test]
    fn test_register_empty_nick() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);

        d.on_line(a.id, "REGISTER:");
        d.on_line(a.id, "REGISTER::alice");

        assert_eq!(a.lines(), vec![NICK_ERR, RETRY, NICK_ERR, RETRY]);
        assert!(d.registry().is_empty());
    }

    #[test]
    fn test_register_ignores_trailing_fields() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);

        d.on_line(a.id, "REGISTER:alice:whatever");

        assert_eq!(a.lines(), vec!["OK:NICK:alice"]);
    }

    #[test]
    fn test_rename() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);
        let mut b = connect(&mut d);

        d.on_line(a.id, "REGISTER:alice");
        d.on_line(a.id, "REGISTER:alicia");

        assert_eq!(a.lines(), vec!["OK:NICK:alice", "OK:NICK:alicia"]);
        assert!(!d.registry().contains("alice"));
        assert_eq!(d.registry().nick_of(a.id), Some("alicia"));
        assert_eq!(d.registry().len(), 1);

        // The old nick is free again
        d.on_line(b.id, "REGISTER:alice");
        assert_eq!(b.lines(), vec!["OK:NICK:alice"]);
    }

    #[test]
    fn test_rename_to_taken_keeps_old_nick() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);
        let mut b = connect(&mut d);

        d.on_line(a.id, "REGISTER:alice");
        d.on_line(b.id, "REGISTER:bob");
        a.lines();
        b.lines();

        d.on_line(a.id, "REGISTER:bob");
        assert_eq!(a.lines(), vec![NICK_ERR, RETRY]);

        // Still registered as alice
        d.on_line(a.id, "CHAT:still here");
        assert_eq!(a.lines(), vec!["OK:CHAT:alice:still here"]);
        assert_eq!(b.lines(), vec!["OK:CHAT:alice:still here"]);
    }

    #[test]
    fn test_chat_unregistered() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);
        let mut b = connect(&mut d);
        d.on_line(b.id, "REGISTER:bob");
        b.lines();

        d.on_line(a.id, "CHAT:hello");

        assert_eq!(
            a.lines(),
            vec!["ERR:CHAT:Unregistered user! register first.", RETRY]
        );
        assert!(b.lines().is_empty());
    }

    #[test]
    fn test_chat_broadcast_includes_sender() {
        let mut d = dispatcher();
        let mut clients: Vec<TestClient> = (0..4).map(|_| connect(&mut d)).collect();
        for (i, c) in clients.iter_mut().enumerate() {
            d.on_line(c.id, &format!("REGISTER:user{}", i));
            c.lines();
        }
        let mut lurker = connect(&mut d);

        let sender = clients[2].id;
        d.on_line(sender, "CHAT:hi: there");

        for c in clients.iter_mut() {
            assert_eq!(c.lines(), vec!["OK:CHAT:user2:hi: there"]);
        }
        // Unregistered connections receive nothing
        assert!(lurker.lines().is_empty());
    }

    #[test]
    fn test_broadcast_survives_dead_peer() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);
        let b = connect(&mut d);
        d.on_line(a.id, "REGISTER:alice");
        d.on_line(b.id, "REGISTER:bob");
        a.lines();

        // bob's writer is gone but the close event has not arrived yet
        let bob_id = b.id;
        drop(b);
        d.on_line(a.id, "CHAT:anyone?");
        assert_eq!(a.lines(), vec!["OK:CHAT:alice:anyone?"]);

        d.on_close(bob_id);
        assert!(!d.registry().contains("bob"));
    }

    #[test]
    fn test_unregister_closes_and_frees_nick() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);
        let mut b = connect(&mut d);

        d.on_line(a.id, "REGISTER:alice");
        d.on_line(a.id, "UNREGISTER");

        assert_eq!(a.lines(), vec!["OK:NICK:alice", "<close>"]);
        assert!(!d.registry().contains("alice"));

        d.on_line(b.id, "REGISTER:alice");
        assert_eq!(b.lines(), vec!["OK:NICK:alice"]);
    }

    #[test]
    fn test_unregister_when_unregistered() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);

        d.on_line(a.id, "UNREGISTER:bye");

        assert_eq!(a.lines(), vec!["<close>"]);
        assert!(d.registry().is_empty());
    }

    #[test]
    fn test_unregister_then_close_is_idempotent() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);
        let mut b = connect(&mut d);
        d.on_line(a.id, "REGISTER:alice");
        d.on_line(a.id, "UNREGISTER:");

        // b takes the nick before a's close event arrives
        d.on_line(b.id, "REGISTER:alice");
        d.on_close(a.id);
        d.on_close(a.id);

        assert_eq!(d.registry().nick_of(b.id), Some("alice"));
        assert_eq!(b.lines(), vec!["OK:NICK:alice"]);

        // Lines arriving after UNREGISTER are ignored
        d.on_line(a.id, "CHAT:ghost");
        assert_eq!(a.lines(), vec!["OK:NICK:alice", "<close>"]);
        assert!(b.lines().is_empty());
    }

    #[test]
    fn test_close_frees_nick() {
        let mut d = dispatcher();
        let a = connect(&mut d);
        let mut b = connect(&mut d);

        d.on_line(a.id, "REGISTER:alice");
        d.on_close(a.id);

        assert!(d.registry().is_empty());
        d.on_line(b.id, "REGISTER:alice");
        assert_eq!(b.lines(), vec!["OK:NICK:alice"]);
    }

    #[test]
    fn test_close_does_not_announce() {
        let mut d = dispatcher();
        let a = connect(&mut d);
        let mut b = connect(&mut d);
        d.on_line(a.id, "REGISTER:alice");
        d.on_line(b.id, "REGISTER:bob");
        b.lines();

        d.on_close(a.id);

        assert!(b.lines().is_empty());
    }

    #[test]
    fn test_client_with_full_queue_is_dropped() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);

        let (tx, _slow_rx) = mpsc::channel(2);
        let slow = ClientHandle::new(ClientId::new(), tx);
        let slow_id = slow.id;
        let shutdown = slow.shutdown_token();
        d.on_connect(slow);

        d.on_line(slow_id, "REGISTER:slow");
        d.on_line(a.id, "REGISTER:alice");
        d.on_line(a.id, "CHAT:one");
        assert!(!shutdown.is_cancelled());

        // The slow client's queue is full now
        d.on_line(a.id, "CHAT:two");

        assert!(shutdown.is_cancelled());
        assert!(!d.registry().contains("slow"));
        assert_eq!(
            a.lines(),
            vec!["OK:NICK:alice", "OK:CHAT:alice:one", "OK:CHAT:alice:two"]
        );

        // Its nick is free and its late close event is harmless
        d.on_close(slow_id);
        d.on_line(a.id, "REGISTER:slow");
        assert_eq!(a.lines(), vec!["OK:NICK:slow"]);
    }

    #[test]
    fn test_malformed_line_ignored() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);

        d.on_line(a.id, "hello there");
        d.on_line(a.id, "");
        d.on_line(a.id, "REGISTER");

        assert!(a.lines().is_empty());
        assert!(d.registry().is_empty());
    }

    #[test]
    fn test_unknown_command() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);
        d.on_line(a.id, "REGISTER:alice");
        a.lines();

        d.on_line(a.id, "WHOIS:bob");

        assert_eq!(a.lines(), vec!["ERR:WHOIS:Unknown command", RETRY]);
        // State unchanged
        assert_eq!(d.registry().nick_of(a.id), Some("alice"));
    }

    #[test]
    fn test_example_scenario() {
        let mut d = dispatcher();
        let mut a = connect(&mut d);
        let mut b = connect(&mut d);

        d.on_line(a.id, "REGISTER:alice");
        assert_eq!(a.lines(), vec!["OK:NICK:alice"]);

        d.on_line(b.id, "REGISTER:alice");
        assert_eq!(b.lines(), vec![NICK_ERR, RETRY]);

        d.on_line(b.id, "REGISTER:bob");
        b.lines();

        d.on_line(a.id, "CHAT:hi");
        assert_eq!(a.lines(), vec!["OK:CHAT:alice:hi"]);
        assert_eq!(b.lines(), vec!["OK:CHAT:alice:hi"]);

        d.on_line(a.id, "UNREGISTER");
        assert_eq!(a.lines(), vec!["<close>"]);
        d.on_close(a.id);

        d.on_line(b.id, "REGISTER:alice");
        assert_eq!(b.lines(), vec!["OK:NICK:alice"]);
    }

    #[tokio::test]
    async fn test_run_loop_processes_commands_in_order() {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let task = tokio::spawn(Dispatcher::new(cmd_rx).run());

        let (tx, mut rx) = mpsc::channel(8);
        let client_id = ClientId::new();
        cmd_tx
            .send(DispatchCommand::Connect {
                handle: ClientHandle::new(client_id, tx),
            })
            .await
            .unwrap();
        for line in ["REGISTER:alice", "CHAT:one", "CHAT:two"] {
            cmd_tx
                .send(DispatchCommand::Line {
                    client_id,
                    line: line.to_string(),
                })
                .await
                .unwrap();
        }
        cmd_tx
            .send(DispatchCommand::Disconnect { client_id })
            .await
            .unwrap();
        drop(cmd_tx);
        task.await.unwrap();

        let mut lines = Vec::new();
        while let Some(Outbound::Message(msg)) = rx.recv().await {
            lines.extend(msg.lines());
        }
        assert_eq!(
            lines,
            vec!["OK:NICK:alice", "OK:CHAT:alice:one", "OK:CHAT:alice:two"]
        );
    }
}
