//! Configuration types for a cluster node.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// Default address the session listener binds to.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9000";

/// Default ALPN identifier negotiated on every peer connection.
pub const DEFAULT_ALPN_PROTOCOL: &str = "raftlink";

/// Default deadline for a single connect or stream-open attempt.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;

/// Default pause between failed connect or stream-open attempts.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;

/// Default deadline for the handshake reply.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Default QUIC keep-alive interval for outbound connections.
pub const DEFAULT_KEEP_ALIVE_INTERVAL_MS: u64 = 15_000;

/// Configuration for a cluster node.
///
/// Loaded once at startup and treated as immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Addresses (host:port) of the peers this node dials.
    pub peer_addresses: Vec<String>,

    /// Address the session listener binds to.
    pub listen_address: String,

    /// Path to the PEM certificate chain presented to inbound peers.
    pub tls_cert_path: PathBuf,

    /// Path to the PEM private key for the certificate.
    pub tls_key_path: PathBuf,

    /// Deadline for one connect or stream-open attempt, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Pause between failed attempts, in milliseconds.
    pub retry_backoff_ms: u64,

    /// Deadline for the handshake reply, in milliseconds.
    pub handshake_timeout_ms: u64,

    /// Keep-alive interval for outbound connections, in milliseconds.
    pub keep_alive_interval_ms: u64,

    /// ALPN protocol identifier.
    pub alpn_protocol: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            peer_addresses: Vec::new(),
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            tls_cert_path: PathBuf::new(),
            tls_key_path: PathBuf::new(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            keep_alive_interval_ms: DEFAULT_KEEP_ALIVE_INTERVAL_MS,
            alpn_protocol: DEFAULT_ALPN_PROTOCOL.to_string(),
        }
    }
}

impl ClusterConfig {
    /// Create a new configuration listening on the given address.
    pub fn new(listen_address: impl Into<String>) -> Self {
        Self {
            listen_address: listen_address.into(),
            ..Default::default()
        }
    }

    /// Set the listen address.
    pub fn with_listen_address(mut self, address: impl Into<String>) -> Self {
        self.listen_address = address.into();
        self
    }

    /// Add a single peer address.
    pub fn with_peer(mut self, address: impl Into<String>) -> Self {
        self.peer_addresses.push(address.into());
        self
    }

    /// Replace the peer list, dropping blank entries.
    pub fn with_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.peer_addresses = peers
            .into_iter()
            .map(Into::into)
            .map(|peer: String| peer.trim().to_string())
            .filter(|peer| !peer.is_empty())
            .collect();
        self
    }

    /// Replace the peer list from a comma separated string.
    pub fn with_peer_list(self, peers: &str) -> Self {
        self.with_peers(peers.split(','))
    }

    /// Set the certificate and key paths.
    pub fn with_tls_files(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.tls_cert_path = cert_path.into();
        self.tls_key_path = key_path.into();
        self
    }

    /// Set the per-attempt connect timeout.
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set the retry backoff.
    pub fn with_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    /// Set the handshake timeout.
    pub fn with_handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.handshake_timeout_ms = ms;
        self
    }

    /// Set the keep-alive interval.
    pub fn with_keep_alive_interval_ms(mut self, ms: u64) -> Self {
        self.keep_alive_interval_ms = ms;
        self
    }

    /// Set the ALPN protocol identifier.
    pub fn with_alpn_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.alpn_protocol = protocol.into();
        self
    }

    /// Per-attempt connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Pause between failed attempts.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Deadline for the handshake reply.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Keep-alive interval for outbound connections.
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    /// Check the configuration before the node starts.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.listen_address.trim().is_empty() {
            return Err(ClusterError::Config("listen address is empty".to_string()));
        }
        if self.alpn_protocol.is_empty() {
            return Err(ClusterError::Config("ALPN protocol is empty".to_string()));
        }
        if self.connect_timeout_ms == 0 || self.handshake_timeout_ms == 0 {
            return Err(ClusterError::Config(
                "connect and handshake timeouts must be non-zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for address in &self.peer_addresses {
            if split_host_port(address).is_none() {
                return Err(ClusterError::InvalidAddress(format!(
                    "peer address {:?} is not host:port",
                    address
                )));
            }
            if !seen.insert(address.as_str()) {
                return Err(ClusterError::Config(format!(
                    "peer address {} is listed more than once",
                    address
                )));
            }
        }

        Ok(())
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
pub(crate) fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_config_default() {
        let config = ClusterConfig::default();
        assert!(config.peer_addresses.is_empty());
        assert_eq!(config.listen_address, DEFAULT_LISTEN_ADDRESS);
        assert_eq!(config.connect_timeout(), Duration::from_secs(2));
        assert_eq!(config.retry_backoff(), Duration::from_secs(1));
        assert_eq!(config.keep_alive_interval(), Duration::from_secs(15));
        assert_eq!(config.alpn_protocol, DEFAULT_ALPN_PROTOCOL);
    }

    #[test]
    fn test_cluster_config_builder() {
        let config = ClusterConfig::new("127.0.0.1:9100")
            .with_peer("node2:9100")
            .with_peer("node3:9100")
            .with_tls_files("/etc/raftlink/cert.pem", "/etc/raftlink/key.pem")
            .with_connect_timeout_ms(500)
            .with_handshake_timeout_ms(750);

        assert_eq!(config.listen_address, "127.0.0.1:9100");
        assert_eq!(config.peer_addresses, vec!["node2:9100", "node3:9100"]);
        assert_eq!(config.tls_cert_path, PathBuf::from("/etc/raftlink/cert.pem"));
        assert_eq!(config.connect_timeout(), Duration::from_millis(500));
        assert_eq!(config.handshake_timeout(), Duration::from_millis(750));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_peer_list_drops_blank_entries() {
        let config = ClusterConfig::default().with_peer_list("");
        assert!(config.peer_addresses.is_empty());

        let config = ClusterConfig::default().with_peer_list("a:1, b:2,,");
        assert_eq!(config.peer_addresses, vec!["a:1", "b:2"]);
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_addresses() {
        let config = ClusterConfig::default().with_peers(["a:1", "a:1"]);
        assert!(matches!(config.validate(), Err(ClusterError::Config(_))));

        let config = ClusterConfig::default().with_peer("no-port");
        assert!(matches!(
            config.validate(),
            Err(ClusterError::InvalidAddress(_))
        ));

        let config = ClusterConfig::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("localhost:9000"), Some(("localhost", 9000)));
        assert_eq!(split_host_port("[::1]:9000"), Some(("::1", 9000)));
        assert_eq!(split_host_port("localhost"), None);
        assert_eq!(split_host_port(":9000"), None);
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let config: ClusterConfig =
            serde_json::from_str(r#"{"peer_addresses":["n2:9000"],"listen_address":"0.0.0.0:9001"}"#)
                .unwrap();
        assert_eq!(config.peer_addresses, vec!["n2:9000"]);
        assert_eq!(config.listen_address, "0.0.0.0:9001");
        assert_eq!(config.retry_backoff_ms, DEFAULT_RETRY_BACKOFF_MS);
    }
}
