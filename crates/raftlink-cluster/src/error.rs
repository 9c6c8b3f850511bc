//! Error types for raftlink-cluster.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the cluster transport.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Could not establish a QUIC connection to a peer.
    #[error("could not connect to {address}: {reason}")]
    TransportConnect {
        /// The peer address being dialed.
        address: String,
        /// Why the attempt failed.
        reason: String,
    },

    /// Could not open a bidirectional stream on an established connection.
    #[error("could not open stream: {0}")]
    StreamOpen(String),

    /// Writing or reading the handshake line failed.
    #[error("handshake I/O error: {0}")]
    HandshakeIo(String),

    /// The peer did not answer the handshake in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// An inbound session failed before it was established.
    #[error("accept error: {0}")]
    Accept(String),

    /// Reading from or acknowledging on an inbound stream failed.
    #[error("session stream error: {0}")]
    SessionStream(String),

    /// The peer closed an inbound stream cleanly.
    #[error("stream closed by peer")]
    StreamClosed,

    /// Certificate or key could not be loaded, or TLS setup failed.
    #[error("TLS setup error: {0}")]
    Tls(String),

    /// The listener could not bind its address.
    #[error("failed to bind {address}: {reason}")]
    Bind {
        /// The listen address.
        address: String,
        /// Why binding failed.
        reason: String,
    },

    /// An address could not be parsed or resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation was stopped by node shutdown.
    #[error("operation cancelled by shutdown")]
    Cancelled,
}

impl ClusterError {
    /// Whether this error is fatal at startup.
    ///
    /// Setup errors are surfaced to the caller of [`crate::Node::run`]; every
    /// other error is handled inside the component that produced it.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            ClusterError::Tls(_)
                | ClusterError::Bind { .. }
                | ClusterError::Config(_)
                | ClusterError::InvalidAddress(_)
        )
    }

    /// Whether this error is a clean end of stream.
    pub fn is_stream_closed(&self) -> bool {
        matches!(self, ClusterError::StreamClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_classification() {
        assert!(ClusterError::Tls("bad pem".into()).is_setup());
        assert!(ClusterError::Bind {
            address: "0.0.0.0:9000".into(),
            reason: "in use".into(),
        }
        .is_setup());
        assert!(!ClusterError::StreamOpen("reset".into()).is_setup());
        assert!(!ClusterError::HandshakeTimeout(Duration::from_secs(1)).is_setup());
        assert!(!ClusterError::Cancelled.is_setup());
    }

    #[test]
    fn test_error_display() {
        let err = ClusterError::TransportConnect {
            address: "10.0.0.2:9000".into(),
            reason: "timed out".into(),
        };
        assert_eq!(err.to_string(), "could not connect to 10.0.0.2:9000: timed out");
        assert!(ClusterError::StreamClosed.is_stream_closed());
    }
}
