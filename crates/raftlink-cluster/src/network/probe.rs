//! One-shot request/acknowledgment client.
//!
//! Used by the test client binary to check that a node's listener is up and
//! acknowledging commands.

use std::time::Duration;

use quinn::VarInt;
use tokio::io::BufReader;

use crate::config::{DEFAULT_ALPN_PROTOCOL, DEFAULT_KEEP_ALIVE_INTERVAL_MS};
use crate::error::ClusterError;
use crate::network::command::exchange_line;
use crate::network::listener::DRAIN_TIMEOUT;
use crate::network::{client_endpoint, resolve, server_name, tls};

/// Default deadline for each phase of a probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe settings.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// ALPN identifier to offer.
    pub alpn_protocol: String,
    /// Deadline for connecting, and separately for the reply.
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            alpn_protocol: DEFAULT_ALPN_PROTOCOL.to_string(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl ProbeConfig {
    /// Set the ALPN identifier.
    pub fn with_alpn_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.alpn_protocol = protocol.into();
        self
    }

    /// Set the connect and reply deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Connect to `target`, send `message` on a new stream and return the reply line.
pub async fn round_trip(
    target: &str,
    message: &str,
    config: &ProbeConfig,
) -> Result<String, ClusterError> {
    let client_config = tls::client_config(
        &config.alpn_protocol,
        Duration::from_millis(DEFAULT_KEEP_ALIVE_INTERVAL_MS),
    )?;
    let addr = resolve(target).await?;
    let endpoint = client_endpoint(addr, client_config)?;

    let connecting = endpoint
        .connect(addr, &server_name(target))
        .map_err(|e| ClusterError::TransportConnect {
            address: target.to_string(),
            reason: e.to_string(),
        })?;
    let connection = tokio::time::timeout(config.timeout, connecting)
        .await
        .map_err(|_| ClusterError::TransportConnect {
            address: target.to_string(),
            reason: format!("timed out after {:?}", config.timeout),
        })?
        .map_err(|e| ClusterError::TransportConnect {
            address: target.to_string(),
            reason: e.to_string(),
        })?;

    tracing::debug!(remote = %connection.remote_address(), "probe connected");

    let (mut send, recv) = connection
        .open_bi()
        .await
        .map_err(|e| ClusterError::StreamOpen(e.to_string()))?;
    let mut recv = BufReader::new(recv);

    let reply = exchange_line(&mut recv, &mut send, message, config.timeout).await;

    connection.close(VarInt::from_u32(0), b"done");
    let _ = tokio::time::timeout(DRAIN_TIMEOUT, endpoint.wait_idle()).await;

    reply
}
