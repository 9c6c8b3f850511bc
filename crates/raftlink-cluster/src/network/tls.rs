//! TLS material and QUIC endpoint configuration.
//!
//! Inbound sessions present a certificate loaded from PEM files. Outbound
//! connections skip server certificate verification, which is only suitable
//! for development clusters.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

use crate::error::ClusterError;

/// File name used for generated certificates.
pub const CERT_FILE_NAME: &str = "cert.pem";

/// File name used for generated private keys.
pub const KEY_FILE_NAME: &str = "key.pem";

/// Certificate chain and private key presented by the session listener.
#[derive(Debug)]
pub struct TlsIdentity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl TlsIdentity {
    /// Load a PEM certificate chain and private key from disk.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, ClusterError> {
        let cert_chain = CertificateDer::pem_file_iter(cert_path)
            .map_err(|e| {
                ClusterError::Tls(format!(
                    "failed to read certificate {}: {}",
                    cert_path.display(),
                    e
                ))
            })?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                ClusterError::Tls(format!(
                    "failed to parse certificate {}: {}",
                    cert_path.display(),
                    e
                ))
            })?;

        if cert_chain.is_empty() {
            return Err(ClusterError::Tls(format!(
                "no certificates found in {}",
                cert_path.display()
            )));
        }

        let key = PrivateKeyDer::from_pem_file(key_path).map_err(|e| {
            ClusterError::Tls(format!(
                "failed to read private key {}: {}",
                key_path.display(),
                e
            ))
        })?;

        Ok(Self { cert_chain, key })
    }

    /// Generate an in-memory self-signed identity for the given names.
    pub fn self_signed(subject_alt_names: Vec<String>) -> Result<Self, ClusterError> {
        let certified = rcgen::generate_simple_self_signed(subject_alt_names)
            .map_err(|e| ClusterError::Tls(format!("failed to generate certificate: {}", e)))?;

        Ok(Self {
            cert_chain: vec![certified.cert.der().clone()],
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                certified.key_pair.serialize_der(),
            )),
        })
    }
}

/// Write a self-signed certificate and key as PEM files into `dir`.
///
/// Returns the certificate and key paths.
pub fn write_self_signed(
    dir: &Path,
    subject_alt_names: Vec<String>,
) -> Result<(PathBuf, PathBuf), ClusterError> {
    let certified = rcgen::generate_simple_self_signed(subject_alt_names)
        .map_err(|e| ClusterError::Tls(format!("failed to generate certificate: {}", e)))?;

    fs::create_dir_all(dir).map_err(|e| {
        ClusterError::Tls(format!("failed to create {}: {}", dir.display(), e))
    })?;

    let cert_path = dir.join(CERT_FILE_NAME);
    let key_path = dir.join(KEY_FILE_NAME);
    fs::write(&cert_path, certified.cert.pem()).map_err(|e| {
        ClusterError::Tls(format!("failed to write {}: {}", cert_path.display(), e))
    })?;
    fs::write(&key_path, certified.key_pair.serialize_pem()).map_err(|e| {
        ClusterError::Tls(format!("failed to write {}: {}", key_path.display(), e))
    })?;

    tracing::info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "generated self-signed certificate"
    );

    Ok((cert_path, key_path))
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build the QUIC server configuration for the session listener.
pub fn server_config(identity: TlsIdentity, alpn: &str) -> Result<quinn::ServerConfig, ClusterError> {
    let mut crypto = rustls::ServerConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| ClusterError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(identity.cert_chain, identity.key)
        .map_err(|e| ClusterError::Tls(format!("invalid certificate or key: {}", e)))?;
    crypto.alpn_protocols = vec![alpn.as_bytes().to_vec()];

    let crypto = QuicServerConfig::try_from(crypto).map_err(|e| ClusterError::Tls(e.to_string()))?;
    Ok(quinn::ServerConfig::with_crypto(Arc::new(crypto)))
}

/// Build the QUIC client configuration used for outbound peers.
pub fn client_config(alpn: &str, keep_alive: Duration) -> Result<quinn::ClientConfig, ClusterError> {
    let provider = crypto_provider();
    let mut crypto = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| ClusterError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![alpn.as_bytes().to_vec()];

    let crypto = QuicClientConfig::try_from(crypto).map_err(|e| ClusterError::Tls(e.to_string()))?;
    let mut config = quinn::ClientConfig::new(Arc::new(crypto));

    let mut transport = quinn::TransportConfig::default();
    transport.keep_alive_interval(Some(keep_alive));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Accepts any server certificate. Signatures are still checked so the
/// handshake itself stays well-formed.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
