mod api;
mod catalog;
mod config;
mod engine;
mod mdns;
mod transport;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::catalog::CatalogHandle;
use crate::config::Config;
use crate::engine::{Engine, EngineHandle};
use crate::mdns::{MdnsSettings, MdnsTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scan_discoveryd=info"))
        )
        .init();

    tracing::info!("Starting scan-discoveryd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/scan-discovery/discoveryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // Start catalog thread
    let catalog = CatalogHandle::spawn();

    // Create and start the discovery engine
    let transport = MdnsTransport::new(MdnsSettings::from(&config.discovery));
    let (mut engine, events) = Engine::new(
        config.discovery.engine_config(),
        Box::new(transport),
        Arc::new(catalog.clone()),
    );
    engine.start().context("Failed to start discovery engine")?;

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn engine task
    let (engine_handle, engine_task) = EngineHandle::spawn(engine, events, cancel.clone());

    // Build API router
    let app_state = api::routes::AppState {
        catalog: catalog.clone(),
        engine: engine_handle,
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Trigger cancellation
    cancel.cancel();

    // Engine withdraws its published devices on the way out
    let _ = tokio::join!(engine_task, server_handle);

    // Shutdown catalog thread
    if let Err(e) = catalog.shutdown() {
        tracing::error!("Failed to shutdown catalog: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
