//! Nickname registry
//!
//! Authoritative mapping from nickname to connection handle. Keeps a
//! reverse index so a connection owns at most one nickname, and an
//! insertion sequence so snapshots come out in a deterministic order.

use std::collections::HashMap;

use crate::client::ClientHandle;
use crate::error::ProtocolError;
use crate::types::ClientId;

#[derive(Debug)]
struct Entry {
    seq: u64,
    handle: ClientHandle,
}

/// Nickname → connection handle mapping
///
/// Invariants: nicknames are unique and non-empty, and each `ClientId`
/// appears in at most one entry.
#[derive(Debug, Default)]
pub struct Registry {
    /// Nickname -> entry
    entries: HashMap<String, Entry>,
    /// Reverse index: ClientId -> nickname
    nicks: HashMap<ClientId, String>,
    next_seq: u64,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `nick` for a connection that has no nickname yet
    ///
    /// Fails with `NickTaken` if `nick` is empty or in use, or if the
    /// handle already owns a nickname (use `reregister` for renames).
    pub fn register(&mut self, nick: &str, handle: ClientHandle) -> Result<(), ProtocolError> {
        if !self.is_available(nick) || self.nicks.contains_key(&handle.id) {
            return Err(ProtocolError::NickTaken);
        }
        self.insert(nick, handle);
        Ok(())
    }

    /// Atomically rename `handle` from `old_nick` to `new_nick`
    ///
    /// `old_nick` is only removed if it belongs to `handle`. On failure
    /// the registry is left untouched.
    pub fn reregister(
        &mut self,
        old_nick: &str,
        new_nick: &str,
        handle: ClientHandle,
    ) -> Result<(), ProtocolError> {
        if !self.is_available(new_nick) {
            return Err(ProtocolError::NickTaken);
        }

        let owned = self
            .entries
            .get(old_nick)
            .is_some_and(|entry| entry.handle.id == handle.id);
        if owned {
            self.entries.remove(old_nick);
        }
        // Drop any other nickname still held by this handle
        if let Some(stale) = self.nicks.remove(&handle.id) {
            self.entries.remove(&stale);
        }

        self.insert(new_nick, handle);
        Ok(())
    }

    /// Remove `nick` if present (idempotent)
    pub fn unregister(&mut self, nick: &str) {
        if let Some(entry) = self.entries.remove(nick) {
            self.nicks.remove(&entry.handle.id);
        }
    }

    /// Snapshot of all registered handles, in insertion order
    pub fn all_handles(&self) -> Vec<ClientHandle> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.handle.clone()).collect()
    }

    /// Check whether `nick` is registered
    pub fn contains(&self, nick: &str) -> bool {
        self.entries.contains_key(nick)
    }

    /// Nickname currently owned by a connection
    pub fn nick_of(&self, client_id: ClientId) -> Option<&str> {
        self.nicks.get(&client_id).map(String::as_str)
    }

    /// Number of registered nicknames
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no nickname is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_available(&self, nick: &str) -> bool {
        !nick.is_empty() && !self.entries.contains_key(nick)
    }

    fn insert(&mut self, nick: &str, handle: ClientHandle) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.nicks.insert(handle.id, nick.to_string());
        self.entries.insert(nick.to_string(), Entry { seq, handle });
    }
}
