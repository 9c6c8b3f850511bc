//! Server command-line configuration.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use raftlink_cluster::network::tls::write_self_signed;
use raftlink_cluster::ClusterConfig;

use crate::error::Error;

/// Names the generated development certificate is issued for.
const SELF_SIGNED_NAMES: [&str; 2] = ["localhost", "127.0.0.1"];

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "raftlink-server")]
#[command(version, about = "raftlink cluster node", long_about = None)]
pub struct Args {
    /// Comma separated addresses (host:port) of the peers to dial.
    #[arg(long, value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Path to the TLS certificate chain (PEM).
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// Path to the TLS private key (PEM).
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Address to accept peer sessions on.
    #[arg(long)]
    pub listen: Option<String>,

    /// JSON file with a base configuration. Flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Deadline for one connect attempt in milliseconds.
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Pause between failed connect attempts in milliseconds.
    #[arg(long)]
    pub retry_backoff_ms: Option<u64>,

    /// Deadline for the handshake reply in milliseconds.
    #[arg(long)]
    pub handshake_timeout_ms: Option<u64>,

    /// Write a self-signed certificate and key into DIR and use them.
    #[arg(long, value_name = "DIR", conflicts_with_all = ["cert", "key"])]
    pub generate_self_signed: Option<PathBuf>,
}

impl Args {
    /// Convert command-line arguments to a cluster configuration.
    ///
    /// With `--generate-self-signed` this writes the certificate files.
    pub fn into_config(self) -> Result<ClusterConfig, Error> {
        let mut config = match &self.config {
            Some(path) => load_config_file(path)?,
            None => ClusterConfig::default(),
        };

        if !self.peers.is_empty() {
            config = config.with_peers(self.peers);
        }
        if let Some(listen) = self.listen {
            config = config.with_listen_address(listen);
        }

        match (self.cert, self.key) {
            (Some(cert), Some(key)) => config = config.with_tls_files(cert, key),
            (None, None) => {}
            _ => {
                return Err(Error::Config(
                    "--cert and --key must be given together".to_string(),
                ))
            }
        }

        if let Some(dir) = self.generate_self_signed {
            let names = SELF_SIGNED_NAMES.iter().map(|name| name.to_string()).collect();
            let (cert, key) = write_self_signed(&dir, names)?;
            config = config.with_tls_files(cert, key);
        }

        if let Some(ms) = self.connect_timeout_ms {
            config = config.with_connect_timeout_ms(ms);
        }
        if let Some(ms) = self.retry_backoff_ms {
            config = config.with_retry_backoff_ms(ms);
        }
        if let Some(ms) = self.handshake_timeout_ms {
            config = config.with_handshake_timeout_ms(ms);
        }

        if config.tls_cert_path.as_os_str().is_empty() || config.tls_key_path.as_os_str().is_empty()
        {
            return Err(Error::Config(
                "a certificate is required: pass --cert and --key, or --generate-self-signed"
                    .to_string(),
            ));
        }

        Ok(config)
    }
}

fn load_config_file(path: &Path) -> Result<ClusterConfig, Error> {
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| Error::Config(format!("invalid config file {}: {}", path.display(), e)))
}
