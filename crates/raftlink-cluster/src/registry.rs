//! Shared registry of known peers.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{ConnectionState, Peer};

/// Type alias for a registry shared across dialer tasks.
pub type SharedPeerRegistry = Arc<PeerRegistry>;

/// Registry of known peers and their connection state.
///
/// Every operation takes the same lock, so writers for different addresses
/// never lose each other's updates. Entries are only appended or marked
/// connected; nothing is removed.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<Vec<Peer>>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry behind an `Arc`.
    pub fn shared() -> SharedPeerRegistry {
        Arc::new(Self::new())
    }

    /// Append `address` as connected, or mark the existing entry connected.
    pub fn record_connected(&self, address: &str) {
        let mut peers = self.peers.lock();
        match peers.iter_mut().find(|peer| peer.address == address) {
            Some(peer) => peer.state = ConnectionState::Connected,
            None => peers.push(Peer::connected(address)),
        }
    }

    /// Copy of all peers in the order they were first recorded.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers.lock().clone()
    }

    /// Look up a single peer.
    pub fn get(&self, address: &str) -> Option<Peer> {
        self.peers
            .lock()
            .iter()
            .find(|peer| peer.address == address)
            .cloned()
    }

    /// Number of recorded peers.
    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    /// Whether no peer has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    /// Number of peers currently marked connected.
    pub fn connected_count(&self) -> usize {
        self.peers
            .lock()
            .iter()
            .filter(|peer| peer.is_connected())
            .count()
    }
}
