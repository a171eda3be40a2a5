//! Metrics Ingest - remote-write receiver for container resource metrics
//!
//! This binary accepts Prometheus remote-write traffic, batches samples
//! into watermarked interval slots and persists completed slots to MySQL.

use anyhow::{Context, Result};
use ingest_lib::{
    health::{components, HealthRegistry},
    pipeline::Pipeline,
    store::{MySqlStore, Store},
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting metrics-ingest");

    // Load configuration; missing DB parameters abort here.
    let config = config::IngestConfig::load()?;
    info!(
        interval_secs = config.interval_secs,
        max_delay_slots = config.max_delay_slots,
        chunk_size = config.chunk_size,
        "Service configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::RECEIVER).await;
    health_registry.register(components::METRICS_BUFFER).await;
    health_registry.register(components::OWNER_BUFFER).await;
    health_registry.register(components::STORE).await;

    // Bring up the store and its schema before accepting traffic.
    let store = MySqlStore::connect(&config.store_config(), config.chunk_size)
        .await
        .context("failed to connect to metrics store")?;
    store
        .ensure_schema()
        .await
        .context("failed to create tables")?;
    let store: Arc<dyn Store> = Arc::new(store);

    let pipeline = Arc::new(Pipeline::new(
        config.pipeline_config(),
        store,
        health_registry.clone(),
    ));

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(pipeline, health_registry.clone()));

    // Mark service as ready after initialization
    health_registry.set_ready(true).await;

    // Start the API server
    let api_handle = tokio::spawn(api::serve(config.listen_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    api_handle.abort();

    Ok(())
}
