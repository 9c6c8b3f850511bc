//! Peer bookkeeping types.

use std::fmt;

/// Observed state of the connection to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection has been established.
    Disconnected,
    /// A dial is in progress.
    Connecting,
    /// Dial and handshake completed.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// A remote node, identified by its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Peer address (host:port). Unique within a registry.
    pub address: String,
    /// Last observed connection state.
    pub state: ConnectionState,
}

impl Peer {
    /// Create a peer in the given state.
    pub fn new(address: impl Into<String>, state: ConnectionState) -> Self {
        Self {
            address: address.into(),
            state,
        }
    }

    /// Create a connected peer.
    pub fn connected(address: impl Into<String>) -> Self {
        Self::new(address, ConnectionState::Connected)
    }

    /// Whether the peer is marked connected.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
