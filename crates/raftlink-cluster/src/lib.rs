//! raftlink cluster - peer transport and session handling for a Raft cluster.
//!
//! This crate provides the transport substrate a leader-election protocol
//! runs on:
//! - Dialing configured peers over QUIC with bounded, cancellable retries
//! - A line-based handshake (`connect` / `ack`) on the first stream
//! - A shared registry of peers and their connection state
//! - An inbound listener that serves each session on its own task
//!
//! # Usage
//!
//! ```ignore
//! use raftlink_cluster::{ClusterConfig, Node};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ClusterConfig::new("0.0.0.0:9000")
//!     .with_peer_list("node2:9000,node3:9000")
//!     .with_tls_files("cert.pem", "key.pem");
//!
//! let shutdown = CancellationToken::new();
//! Node::new(config).run(shutdown).await?;
//! ```

pub mod config;
pub mod election;
pub mod error;
pub mod network;
pub mod node;
pub mod registry;
pub mod types;

pub use config::ClusterConfig;
pub use election::{ElectionState, NodeRole};
pub use error::ClusterError;
pub use network::probe::{round_trip, ProbeConfig};
pub use network::{PeerDialer, PeerLink, ReceivedCommand, SessionListener, TlsIdentity};
pub use node::{BoundNode, Node};
pub use registry::{PeerRegistry, SharedPeerRegistry};
pub use types::{ConnectionState, Peer};

pub use tokio_util::sync::CancellationToken;
