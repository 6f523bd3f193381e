//! # Beacon Server
//!
//! Pub/sub relay for consumers and authenticated producers.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! beacon
//!
//! # Run with a custom config file
//! BEACON_CONFIG=/path/to/beacon.toml beacon
//!
//! # Run with environment variables
//! BEACON_PORT=8080 BEACON_HOST=0.0.0.0 BEACON_PRODUCER_PASSWORD=secret beacon
//! ```

use anyhow::Result;
use tenvis_beacon_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=debug,tenvis_beacon=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    tracing::info!("Starting Beacon server on {}:{}", config.host, config.port);
    if config.producer.password.is_none() {
        tracing::warn!("No producer password configured; producer authentication is disabled");
    }

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
