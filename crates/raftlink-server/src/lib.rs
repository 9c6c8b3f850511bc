//! raftlink server library.
//!
//! Command-line configuration and the entry point that runs a cluster node.

pub mod config;
pub mod error;

pub use config::Args;
pub use error::Error;

use raftlink_cluster::{CancellationToken, ClusterConfig, Node};

/// Run a node with `config` until `shutdown` fires.
pub async fn run(config: ClusterConfig, shutdown: CancellationToken) -> Result<(), Error> {
    Node::new(config).run(shutdown).await?;
    Ok(())
}
