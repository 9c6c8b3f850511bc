//! Inbound session listener.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use quinn::{Connection, Endpoint, VarInt};
use tokio::io::BufReader;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::network::command::{CommandChannel, CommandSink};
use crate::network::tls::{self, TlsIdentity};

/// Longest time shutdown waits for closed connections to drain.
///
/// Connections whose peer vanished mid-handshake would otherwise hold the
/// endpoint open until the idle timeout.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Accepts peer sessions and serves the command protocol on their streams.
///
/// Every session runs on its own task, so a long-lived stream never holds up
/// the accept loop.
pub struct SessionListener {
    endpoint: Endpoint,
    commands: Option<CommandSink>,
}

impl SessionListener {
    /// Load the configured certificate and bind the listen address.
    pub fn bind(config: &ClusterConfig) -> Result<Self, ClusterError> {
        let identity = TlsIdentity::load(&config.tls_cert_path, &config.tls_key_path)?;
        Self::bind_with_identity(&config.listen_address, identity, &config.alpn_protocol)
    }

    /// Bind with an already loaded identity.
    pub fn bind_with_identity(
        listen_address: &str,
        identity: TlsIdentity,
        alpn: &str,
    ) -> Result<Self, ClusterError> {
        let addr = listen_address
            .to_socket_addrs()
            .map_err(|e| ClusterError::InvalidAddress(format!("{}: {}", listen_address, e)))?
            .next()
            .ok_or_else(|| {
                ClusterError::InvalidAddress(format!("{} resolved to nothing", listen_address))
            })?;

        let server_config = tls::server_config(identity, alpn)?;
        let endpoint = Endpoint::server(server_config, addr).map_err(|e| ClusterError::Bind {
            address: listen_address.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(address = %addr, alpn, "listening for peer sessions");

        Ok(Self {
            endpoint,
            commands: None,
        })
    }

    /// Forward every received command to `sink`.
    pub fn with_command_sink(mut self, sink: CommandSink) -> Self {
        self.commands = Some(sink);
        self
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ClusterError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ClusterError::Bind {
                address: "listener".to_string(),
                reason: e.to_string(),
            })
    }

    #[cfg(test)]
    pub(crate) fn endpoint_handle(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// Accept sessions until `shutdown` fires or the endpoint is closed.
    ///
    /// Failed session handshakes are logged and do not stop the loop.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ClusterError> {
        let mut sessions = JoinSet::new();

        loop {
            let incoming = tokio::select! {
                _ = shutdown.cancelled() => break,
                incoming = self.endpoint.accept() => incoming,
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "session task panicked");
                        }
                    }
                    continue;
                }
            };

            let Some(incoming) = incoming else {
                tracing::info!("listener endpoint closed");
                break;
            };

            let commands = self.commands.clone();
            let session_shutdown = shutdown.child_token();
            sessions.spawn(async move {
                let remote = incoming.remote_address();
                match incoming.await {
                    Ok(connection) => serve_session(connection, commands, session_shutdown).await,
                    Err(e) => {
                        let err = ClusterError::Accept(e.to_string());
                        tracing::warn!(remote = %remote, error = %err, "accepting session failed");
                    }
                }
            });
        }

        tracing::info!(open_sessions = sessions.len(), "stopping session listener");
        self.endpoint.close(VarInt::from_u32(0), b"shutdown");
        sessions.shutdown().await;
        if tokio::time::timeout(DRAIN_TIMEOUT, self.endpoint.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                open_connections = self.endpoint.open_connections(),
                "connections still draining at shutdown"
            );
        }
        Ok(())
    }
}

/// Serve every stream the peer opens on `connection`, each on its own task.
async fn serve_session(
    connection: Connection,
    commands: Option<CommandSink>,
    shutdown: CancellationToken,
) {
    let remote = connection.remote_address();
    tracing::info!(remote = %remote, "accepted peer session");

    let mut streams = JoinSet::new();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => {
                connection.close(VarInt::from_u32(0), b"shutdown");
                break;
            }
            accepted = connection.accept_bi() => accepted,
            Some(_) = streams.join_next(), if !streams.is_empty() => continue,
        };

        match accepted {
            Ok((send, recv)) => {
                let mut channel =
                    CommandChannel::new(BufReader::new(recv), send, remote).with_sink(commands.clone());
                streams.spawn(async move {
                    let e = match channel.serve().await {
                        Ok(never) => match never {},
                        Err(e) => e,
                    };
                    if e.is_stream_closed() {
                        tracing::debug!(remote = %remote, received = channel.received(), "peer finished stream");
                    } else {
                        tracing::warn!(remote = %remote, error = %e, "reading from peer");
                    }
                });
            }
            Err(e) => {
                tracing::info!(remote = %remote, reason = %e, "peer session closed");
                break;
            }
        }
    }

    streams.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let identity = TlsIdentity::self_signed(vec!["localhost".to_string()]).unwrap();
        let listener =
            SessionListener::bind_with_identity("127.0.0.1:0", identity, "raftlink").unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_fails_without_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClusterConfig::new("127.0.0.1:0")
            .with_tls_files(dir.path().join("cert.pem"), dir.path().join("key.pem"));

        let err = SessionListener::bind(&config).err().unwrap();
        assert!(err.is_setup());
    }

    #[tokio::test]
    async fn test_bind_rejects_unparseable_address() {
        let identity = TlsIdentity::self_signed(vec!["localhost".to_string()]).unwrap();
        let err = SessionListener::bind_with_identity("not an address", identity, "raftlink")
            .err()
            .unwrap();
        assert!(matches!(err, ClusterError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let identity = TlsIdentity::self_signed(vec!["localhost".to_string()]).unwrap();
        let listener =
            SessionListener::bind_with_identity("127.0.0.1:0", identity, "raftlink").unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(listener.run(shutdown.clone()));

        shutdown.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
