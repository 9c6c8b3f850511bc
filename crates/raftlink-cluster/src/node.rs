//! Cluster node: wires the registry, peer dialers and session listener together.

use std::net::SocketAddr;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ClusterConfig;
use crate::election::ElectionState;
use crate::error::ClusterError;
use crate::network::command::CommandSink;
use crate::network::dialer::PeerDialer;
use crate::network::listener::SessionListener;
use crate::network::tls;
use crate::registry::{PeerRegistry, SharedPeerRegistry};

/// A cluster node.
///
/// Owns the configuration, the peer registry and the election state. The
/// election state is carried for a future election component and is not
/// touched by anything here.
pub struct Node {
    config: ClusterConfig,
    registry: SharedPeerRegistry,
    election: ElectionState,
}

impl Node {
    /// Create a node with an empty registry.
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            registry: PeerRegistry::shared(),
            election: ElectionState::new(),
        }
    }

    /// Node configuration.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Shared handle to the peer registry.
    pub fn registry(&self) -> SharedPeerRegistry {
        self.registry.clone()
    }

    /// Election state placeholder.
    pub fn election(&self) -> &ElectionState {
        &self.election
    }

    /// Validate the configuration, load the certificate and bind the listener.
    ///
    /// Every error returned here is a setup error.
    pub fn bind(self) -> Result<BoundNode, ClusterError> {
        self.config.validate()?;
        let listener = SessionListener::bind(&self.config)?;
        let client_config =
            tls::client_config(&self.config.alpn_protocol, self.config.keep_alive_interval())?;

        Ok(BoundNode {
            node: self,
            listener,
            client_config,
        })
    }

    /// Bind and run until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ClusterError> {
        self.bind()?.run(shutdown).await
    }
}

/// A node whose listener is bound but whose tasks have not started.
pub struct BoundNode {
    node: Node,
    listener: SessionListener,
    client_config: quinn::ClientConfig,
}

impl BoundNode {
    /// Address the session listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ClusterError> {
        self.listener.local_addr()
    }

    /// Shared handle to the peer registry.
    pub fn registry(&self) -> SharedPeerRegistry {
        self.node.registry()
    }

    /// The node being run.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Forward every command received by the listener to `sink`.
    pub fn with_command_sink(mut self, sink: CommandSink) -> Self {
        self.listener = self.listener.with_command_sink(sink);
        self
    }

    /// Start one dialer per configured peer and run the listener on the
    /// current task until `shutdown` fires.
    ///
    /// If the listener stops on its own, the dialers are stopped too. The
    /// caller's `shutdown` token is never cancelled here.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ClusterError> {
        let BoundNode {
            node,
            listener,
            client_config,
        } = self;
        let node_shutdown = shutdown.child_token();

        let mut dialers = JoinSet::new();
        for address in &node.config.peer_addresses {
            let dialer = PeerDialer::new(
                address.clone(),
                node.registry.clone(),
                client_config.clone(),
                &node.config,
            );
            dialers.spawn(maintain_link(dialer, node_shutdown.child_token()));
        }

        tracing::info!(
            peers = node.config.peer_addresses.len(),
            listen = %node.config.listen_address,
            "node started"
        );

        let result = listener.run(node_shutdown.clone()).await;
        node_shutdown.cancel();
        while let Some(joined) = dialers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "peer dialer task failed");
            }
        }

        tracing::info!(
            connected_peers = node.registry.connected_count(),
            "node stopped"
        );
        result
    }
}

/// Dial a peer and hold the link open until shutdown.
///
/// A link the peer closes is logged and not redialed.
async fn maintain_link(dialer: PeerDialer, shutdown: CancellationToken) {
    let link = match dialer.run(&shutdown).await {
        Ok(link) => link,
        Err(ClusterError::Cancelled) => {
            tracing::debug!(address = dialer.address(), "dial cancelled by shutdown");
            return;
        }
        Err(e) => {
            tracing::warn!(address = dialer.address(), error = %e, "peer dial failed");
            return;
        }
    };

    tokio::select! {
        _ = shutdown.cancelled() => link.close(),
        reason = link.closed() => {
            tracing::warn!(address = link.address(), reason = %reason, "peer session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::NodeRole;

    #[test]
    fn test_new_node_state() {
        let node = Node::new(ClusterConfig::new("127.0.0.1:0").with_peer("127.0.0.1:9001"));
        assert!(node.registry().is_empty());
        assert_eq!(node.election().role, NodeRole::Follower);
        assert_eq!(node.config().peer_addresses.len(), 1);
    }

    #[tokio::test]
    async fn test_bind_surfaces_setup_errors() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(
            ClusterConfig::new("127.0.0.1:0")
                .with_tls_files(dir.path().join("missing.pem"), dir.path().join("missing.key")),
        );

        let err = node.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ClusterError::Tls(_)));
    }

    #[tokio::test]
    async fn test_bind_validates_config() {
        let node = Node::new(ClusterConfig::new("127.0.0.1:0").with_peers(["a:1", "a:1"]));
        assert!(matches!(node.bind(), Err(ClusterError::Config(_))));
    }

    #[tokio::test]
    async fn test_listener_exit_leaves_caller_token_alone() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) =
            tls::write_self_signed(dir.path(), vec!["localhost".to_string()]).unwrap();
        let bound = Node::new(
            ClusterConfig::new("127.0.0.1:0")
                .with_peer("127.0.0.1:9")
                .with_tls_files(cert, key)
                .with_connect_timeout_ms(100)
                .with_retry_backoff_ms(50),
        )
        .bind()
        .unwrap();

        let endpoint = bound.listener.endpoint_handle();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(bound.run(shutdown.clone()));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        endpoint.close(quinn::VarInt::from_u32(0), b"gone");

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("node must stop once its listener stops")
            .unwrap();
        assert!(result.is_ok());
        assert!(!shutdown.is_cancelled());
    }
}
