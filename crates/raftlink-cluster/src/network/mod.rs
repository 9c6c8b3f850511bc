//! QUIC transport between cluster nodes.
//!
//! This module provides:
//! - [`PeerDialer`] - Outbound connection, stream and handshake for one peer
//! - [`SessionListener`] - Inbound session acceptance
//! - [`CommandChannel`] - Line-based command reading on a stream
//! - [`probe`] - One-shot request/acknowledgment client

pub mod command;
pub mod dialer;
pub mod listener;
pub mod probe;
pub mod tls;

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use quinn::Endpoint;

pub use command::{CommandChannel, CommandSink, ReceivedCommand, ACK_LINE, HANDSHAKE_LINE};
pub use dialer::{PeerDialer, PeerLink};
pub use listener::SessionListener;
pub use tls::TlsIdentity;

use crate::config::split_host_port;
use crate::error::ClusterError;

/// Resolve `host:port` to a socket address, preferring IPv4.
///
/// Listeners default to an IPv4 wildcard, while resolvers commonly list
/// `::1` first for `localhost`.
pub(crate) async fn resolve(address: &str) -> Result<SocketAddr, ClusterError> {
    let addrs = tokio::net::lookup_host(address)
        .await
        .map_err(|e| ClusterError::TransportConnect {
            address: address.to_string(),
            reason: format!("address resolution failed: {}", e),
        })?;

    prefer_ipv4(addrs)
        .ok_or_else(|| ClusterError::InvalidAddress(format!("{} resolved to nothing", address)))
}

/// First IPv4 address, or the first address if there is none.
fn prefer_ipv4(addrs: impl IntoIterator<Item = SocketAddr>) -> Option<SocketAddr> {
    let mut first = None;
    for addr in addrs {
        if addr.is_ipv4() {
            return Some(addr);
        }
        first.get_or_insert(addr);
    }
    first
}

/// TLS server name to present when dialing `address`.
pub(crate) fn server_name(address: &str) -> String {
    match split_host_port(address) {
        Some((host, _)) if host != "0.0.0.0" && host != "::" => host.to_string(),
        _ => "localhost".to_string(),
    }
}

/// Create a client endpoint in the same address family as `target`.
pub(crate) fn client_endpoint(
    target: SocketAddr,
    config: quinn::ClientConfig,
) -> Result<Endpoint, ClusterError> {
    let bind: SocketAddr = if target.is_ipv6() {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    };

    let mut endpoint = Endpoint::client(bind).map_err(|e| ClusterError::TransportConnect {
        address: target.to_string(),
        reason: format!("failed to create client endpoint: {}", e),
    })?;
    endpoint.set_default_client_config(config);
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name() {
        assert_eq!(server_name("node2.cluster:9000"), "node2.cluster");
        assert_eq!(server_name("127.0.0.1:9000"), "127.0.0.1");
        assert_eq!(server_name("[::1]:9000"), "::1");
        assert_eq!(server_name("0.0.0.0:9000"), "localhost");
        assert_eq!(server_name("garbage"), "localhost");
    }

    #[tokio::test]
    async fn test_resolve_literal_address() {
        let addr = resolve("127.0.0.1:9000").await.unwrap();
        assert_eq!(addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_prefer_ipv4() {
        let v6: SocketAddr = "[::1]:9000".parse().unwrap();
        let v4: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        assert_eq!(prefer_ipv4([v6, v4]), Some(v4));
        assert_eq!(prefer_ipv4([v4, v6]), Some(v4));
        assert_eq!(prefer_ipv4([v6]), Some(v6));
        assert_eq!(prefer_ipv4(Vec::new()), None);
    }

    #[tokio::test]
    async fn test_resolve_localhost_to_ipv4() {
        let addr = resolve("localhost:9000").await.unwrap();
        assert_eq!(addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_rejects_missing_port() {
        assert!(resolve("127.0.0.1").await.is_err());
    }
}
