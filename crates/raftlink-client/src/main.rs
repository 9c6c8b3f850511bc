//! raftlink client - sends one command to a local node and waits for the acknowledgment.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use raftlink_cluster::{round_trip, ProbeConfig};

const TARGET_ADDRESS: &str = "localhost:9000";
const MESSAGE: &str = "hello world\n";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "raftlink_client=info,raftlink_cluster=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match round_trip(TARGET_ADDRESS, MESSAGE, &ProbeConfig::default()).await {
        Ok(reply) => {
            tracing::info!(target_address = TARGET_ADDRESS, reply = %reply, "round trip complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(target_address = TARGET_ADDRESS, error = %e, "round trip failed");
            Err(e.into())
        }
    }
}
