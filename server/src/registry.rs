//! Registry of identified connections for the chat relay
//!
//! This module tracks which live connections have announced an identity:
//! - Connection handles assigned by the accept loop
//! - The immutable identity each connection announced
//! - The outbound queue used to deliver frames to that connection
//!
//! The registry is an owned value created by the server and shared with every
//! session behind a single mutex, so registration, removal and snapshots are
//! serialized and a snapshot never observes a half-applied update.

use log::debug;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Registry shared between the accept loop, sessions and broadcasts
pub type SharedRegistry = Arc<Mutex<ClientRegistry>>;

/// Queue of encoded frames waiting to be written to one connection
pub type Outbox = mpsc::Sender<Arc<str>>;

/// Frames a connection may have queued before it counts as stalled
pub const OUTBOX_CAPACITY: usize = 256;

/// Opaque handle for one accepted connection
///
/// Handles are allocated in accept order and never reused within a server
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered connection: who it is and how to reach it
#[derive(Debug, Clone)]
pub struct Peer {
    pub identity: String,
    pub outbox: Outbox,
}

/// Mapping from live, identified connections to their identities
#[derive(Debug, Default)]
pub struct ClientRegistry {
    /// Keyed by handle, so iteration follows accept order
    clients: BTreeMap<ConnectionId, Peer>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry ready to be shared between sessions
    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Registers a connection under an identity
    ///
    /// Inserts unconditionally. Registering a handle twice replaces the
    /// previous entry and returns it; sessions never do this in normal flow.
    pub fn register(
        &mut self,
        id: ConnectionId,
        identity: impl Into<String>,
        outbox: Outbox,
    ) -> Option<Peer> {
        let peer = Peer {
            identity: identity.into(),
            outbox,
        };
        debug!("Registering connection {} as {}", id, peer.identity);
        self.clients.insert(id, peer)
    }

    /// Removes a connection, returning the identity it was registered under
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<String> {
        self.clients.remove(id).map(|peer| {
            debug!("Unregistered connection {} ({})", id, peer.identity);
            peer.identity
        })
    }

    #[cfg(test)]
    pub(crate) fn identity_of(&self, id: &ConnectionId) -> Option<&str> {
        self.clients.get(id).map(|peer| peer.identity.as_str())
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &ConnectionId) -> bool {
        self.clients.contains_key(id)
    }

    /// Point-in-time copy of every registered connection
    ///
    /// Later registrations and removals are not reflected in the returned
    /// vector, which may therefore be iterated without holding the lock.
    pub fn snapshot(&self) -> Vec<(ConnectionId, Peer)> {
        self.clients
            .iter()
            .map(|(id, peer)| (*id, peer.clone()))
            .collect()
    }

    /// Returns the number of currently identified connections
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
