//! Outbound connection to a configured peer.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use quinn::{Connection, ConnectionError, Endpoint, RecvStream, SendStream, VarInt};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::network::command::perform_handshake;
use crate::network::{client_endpoint, resolve, server_name};
use crate::registry::SharedPeerRegistry;

/// Dials one peer, opens a stream, performs the handshake and records the
/// peer as connected.
///
/// Connecting and opening the stream are retried with a fixed backoff until
/// they succeed or the shutdown token fires.
pub struct PeerDialer {
    address: String,
    registry: SharedPeerRegistry,
    client_config: quinn::ClientConfig,
    connect_timeout: Duration,
    retry_backoff: Duration,
    handshake_timeout: Duration,
}

impl PeerDialer {
    /// Create a dialer for `address` using the timing from `config`.
    pub fn new(
        address: impl Into<String>,
        registry: SharedPeerRegistry,
        client_config: quinn::ClientConfig,
        config: &ClusterConfig,
    ) -> Self {
        Self {
            address: address.into(),
            registry,
            client_config,
            connect_timeout: config.connect_timeout(),
            retry_backoff: config.retry_backoff(),
            handshake_timeout: config.handshake_timeout(),
        }
    }

    /// Address this dialer connects to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Run the dial sequence.
    ///
    /// Returns [`ClusterError::Cancelled`] if `shutdown` fires first, in which
    /// case nothing is recorded. Handshake failures do not fail the dial: they
    /// are logged, kept on the returned [`PeerLink`], and the peer is still
    /// recorded as connected.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<PeerLink, ClusterError> {
        let ((endpoint, connection), connect_attempts) = self
            .retry("connect", shutdown, || self.try_connect())
            .await?;

        tracing::info!(
            address = %self.address,
            remote = %connection.remote_address(),
            attempts = connect_attempts,
            "connected to peer"
        );

        let ((mut send, recv), _) = self
            .retry("open stream", shutdown, || self.try_open_stream(&connection))
            .await?;
        let mut recv = BufReader::new(recv);

        let handshake = tokio::select! {
            _ = shutdown.cancelled() => return Err(ClusterError::Cancelled),
            result = perform_handshake(&mut recv, &mut send, self.handshake_timeout) => result,
        };

        let (response, handshake_error) = match handshake {
            Ok(line) => (Some(line), None),
            Err(e) => {
                tracing::warn!(address = %self.address, error = %e, "handshake with peer failed");
                (None, Some(e))
            }
        };

        // Recorded even when the handshake failed.
        self.registry.record_connected(&self.address);
        tracing::info!(
            address = %self.address,
            response = response.as_deref().unwrap_or(""),
            "peer recorded as connected"
        );

        Ok(PeerLink {
            address: self.address.clone(),
            response,
            handshake_error,
            connect_attempts,
            connection,
            _send: send,
            _recv: recv,
            _endpoint: endpoint,
        })
    }

    /// One connect attempt, bounded by the connect timeout.
    ///
    /// The attempt's endpoint is closed when the attempt fails, so the peer
    /// is told about the abandoned handshake instead of waiting it out.
    async fn try_connect(&self) -> Result<(Endpoint, Connection), ClusterError> {
        let target = resolve(&self.address).await?;
        let endpoint = client_endpoint(target, self.client_config.clone())?;

        let connecting = match endpoint.connect(target, &server_name(&self.address)) {
            Ok(connecting) => connecting,
            Err(e) => {
                endpoint.close(VarInt::from_u32(0), b"connect failed");
                return Err(ClusterError::TransportConnect {
                    address: self.address.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let reason = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(Ok(connection)) => return Ok((endpoint, connection)),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.connect_timeout),
        };

        endpoint.close(VarInt::from_u32(0), b"connect abandoned");
        Err(ClusterError::TransportConnect {
            address: self.address.clone(),
            reason,
        })
    }

    async fn try_open_stream(
        &self,
        connection: &Connection,
    ) -> Result<(SendStream, RecvStream), ClusterError> {
        tokio::time::timeout(self.connect_timeout, connection.open_bi())
            .await
            .map_err(|_| {
                ClusterError::StreamOpen(format!("timed out after {:?}", self.connect_timeout))
            })?
            .map_err(|e| ClusterError::StreamOpen(e.to_string()))
    }

    /// Repeat `attempt` with the retry backoff between failures until it
    /// succeeds or `shutdown` fires.
    ///
    /// Each attempt enforces its own deadline. Returns the value together
    /// with the number of attempts it took.
    async fn retry<T, F, Fut>(
        &self,
        action: &'static str,
        shutdown: &CancellationToken,
        mut attempt: F,
    ) -> Result<(T, u64), ClusterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClusterError>>,
    {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;

            let error = tokio::select! {
                _ = shutdown.cancelled() => return Err(ClusterError::Cancelled),
                outcome = attempt() => match outcome {
                    Ok(value) => return Ok((value, attempts)),
                    Err(e) => e,
                },
            };

            tracing::warn!(
                address = %self.address,
                attempt = attempts,
                error = %error,
                "could not {}, retrying",
                action
            );

            tokio::select! {
                _ = shutdown.cancelled() => return Err(ClusterError::Cancelled),
                _ = tokio::time::sleep(self.retry_backoff) => {}
            }
        }
    }
}

/// An established link to a peer.
///
/// Holds the QUIC connection and handshake stream open until dropped or
/// closed.
pub struct PeerLink {
    address: String,
    response: Option<String>,
    handshake_error: Option<ClusterError>,
    connect_attempts: u64,
    connection: Connection,
    _send: SendStream,
    _recv: BufReader<RecvStream>,
    _endpoint: Endpoint,
}

impl PeerLink {
    /// Configured address of the peer.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Reply line received for the handshake, if any.
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Error raised while exchanging the handshake, if any.
    pub fn handshake_error(&self) -> Option<&ClusterError> {
        self.handshake_error.as_ref()
    }

    /// Whether the peer acknowledged the handshake.
    pub fn is_acknowledged(&self) -> bool {
        self.response.as_deref() == Some(crate::network::ACK_LINE.trim_end())
    }

    /// Number of connect attempts made before the connection was established.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts
    }

    /// Socket address the connection was established with.
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Wait until the connection is closed by either side.
    pub async fn closed(&self) -> ConnectionError {
        self.connection.closed().await
    }

    /// Close the connection.
    pub fn close(self) {
        self.connection.close(VarInt::from_u32(0), b"shutdown");
    }
}
