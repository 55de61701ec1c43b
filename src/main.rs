//! pkgvault server
//!
//! Loads the configuration, sets up logging and metrics, and serves the
//! configured repositories over HTTP until interrupted.

use anyhow::Context;
use pkgvault::events::MetadataEventQueues;
use pkgvault::repositories::vault_slice;
use pkgvault::{SliceServer, VaultConfig, VaultMetrics};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};

/// Main entry point for the pkgvault server
///
/// # Usage
/// ```bash
/// # Start with default config (pkgvault.yaml)
/// pkgvault
///
/// # Start with custom config
/// pkgvault /etc/pkgvault/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    let config_path = env::args().nth(1).unwrap_or_else(|| "pkgvault.yaml".to_string());
    info!("Loading configuration from: {}", config_path);

    let config = VaultConfig::from_file(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;
    info!("Configuration loaded successfully");
    info!("  - Address: {}", config.server.address);
    info!("  - Repositories: {}", config.repositories.len());
    if config.metrics.enabled {
        info!("  - Metrics at {}", config.metrics.path);
    }
    if config.credentials.is_empty() {
        warn!("No credentials configured, all requests are anonymous");
    }

    let addr = config.socket_addr()?;
    let config = Arc::new(config);
    let metrics = Arc::new(VaultMetrics::new().context("registering metrics")?);
    let events = MetadataEventQueues::for_config(&config);
    match (&events, &config.metadata) {
        (Some(events), Some(metadata)) => {
            events.clone().start(metadata);
        }
        _ => info!("  - Metadata events disabled"),
    }
    let slice = vault_slice(config, events, Some(metrics))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };
    SliceServer::new(slice).serve_until(listener, shutdown).await?;
    info!("pkgvault stopped");
    Ok(())
}
