//! # Relay Worker
//!
//! Runs Relay workers against a channel layer.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! relay
//!
//! # Run with custom config
//! relay --config /path/to/relay.toml
//!
//! # Four workers on HTTP channels only
//! relay --threads 4 --only-channels 'http.*' --exclude-channels http.disconnect -v
//!
//! # Run with environment variables
//! RELAY__WORKER__THREADS=4 RELAY__WORKER__ONLY_CHANNELS=http.* relay
//! ```

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::Arc;
use tenvis_relay_core::shutdown;
use tenvis_relay_worker::cli::Cli;
use tenvis_relay_worker::consumers::EchoConsumer;
use tenvis_relay_worker::{metrics, Bootstrap};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = cli.load_config()?;
    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.worker.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
        metrics::start_metrics_server(config.metrics.port)
            .map_err(|e| anyhow!("Failed to start metrics server: {e}"))?;
    }

    let prepared = Bootstrap::new(config).prepare(|router, layer| {
        let default_channel = router.default_channel().to_string();
        router.register(&default_channel, Arc::new(EchoConsumer::new(layer.clone())))?;
        Ok(())
    })?;

    let (trigger, signal) = shutdown::channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
        trigger.trigger();
    });

    prepared.run(signal).await?;
    Ok(())
}
