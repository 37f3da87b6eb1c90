mod api;
mod catalog;
mod config;
mod dispatcher;
mod events;
mod inventory;
mod mdns;
mod orchestrator;
mod tools;

use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use mdns_sd::ServiceDaemon;
use anyhow::{Context, Result};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::events::ScanEvent;
use crate::inventory::store::HostStore;
use crate::mdns::browser::SdBrowserFactory;
use crate::orchestrator::Orchestrator;
use crate::tools::command::Tools;

const DEFAULT_CONFIG_PATH: &str = "/etc/lanventory/lanventoryd.toml";

/// Explicit path must load; a missing default file means built-in defaults.
fn load_config() -> Result<(Config, String)> {
    match std::env::args().nth(1) {
        Some(path) => {
            let config = Config::load(&path)
                .with_context(|| format!("Failed to load config from {}", path))?;
            Ok((config, path))
        }
        None if !Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Ok((Config::default(), "built-in defaults".to_string()))
        }
        None => {
            let config = Config::load(DEFAULT_CONFIG_PATH)
                .with_context(|| format!("Failed to load config from {}", DEFAULT_CONFIG_PATH))?;
            Ok((config, DEFAULT_CONFIG_PATH.to_string()))
        }
    }
}

/// Log every task failure delivered to consumers.
async fn log_errors(mut events: broadcast::Receiver<ScanEvent>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ScanEvent::Error(err)) => match &err.ip {
                    Some(ip) => tracing::error!("{} failed for {}: {}", err.scope, ip, err.message),
                    None => tracing::error!("{} failed: {}", err.scope, err.message),
                },
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Error logger lagged, skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = cancel.cancelled() => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lanventoryd=info"))
        )
        .init();

    tracing::info!("Starting lanventoryd");

    // Load config
    let (config, source) = load_config()?;
    tracing::info!("Loaded config from {}", source);

    // Resolve scan tools and load catalogs
    let tools = Arc::new(Tools::from_config(&config.tools)?);
    let catalog = Arc::new(Catalog::load(&config.catalog, &config.ports));
    let store = HostStore::new(catalog.clone());

    // Compute initial hash
    let initial_hash = inventory::hash::compute_hash(&store.snapshot());
    // Create hash watch, consumer bus and task channels
    let (hash_tx, hash_rx) = watch::channel(initial_hash);
    let (bus_tx, bus_rx) = broadcast::channel::<ScanEvent>(1024);
    let (task_tx, task_rx) = mpsc::channel(1024);

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn dispatcher task
    let dispatcher = Dispatcher::new(store.clone(), bus_tx, hash_tx);
    let dispatch_cancel = cancel.clone();
    let dispatch_handle = tokio::spawn(async move {
        if let Err(e) = dispatcher::run(dispatcher, task_rx, dispatch_cancel).await {
            tracing::error!("Dispatcher error: {}", e);
        }
    });

    // Spawn error logger task
    let logger_handle = tokio::spawn(log_errors(bus_rx, cancel.clone()));

    // Create mDNS daemon
    let mdns_daemon = ServiceDaemon::new()
        .context("Failed to create mDNS daemon")?;

    // Create scan orchestrator
    let orchestrator = Arc::new(Orchestrator::new(
        task_tx,
        tools,
        catalog,
        Arc::new(SdBrowserFactory::new(mdns_daemon.clone())),
        &config,
    ));

    // Start the configured scan, if any
    if let Some(autostart) = &config.scan.autostart {
        if let Err(e) = orchestrator.start_scan(&autostart.subnet, autostart.mode, false).await {
            tracing::error!("Autostart scan not started: {}", e);
        }
    }

    // Build API router
    let app_state = api::routes::AppState {
        store,
        hash_rx,
        orchestrator: orchestrator.clone(),
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

    // Kill any running discovery tool before the consumers go away
    orchestrator.shutdown().await;

    // Trigger cancellation
    cancel.cancel();

    // Wait for all tasks to complete
    let _ = tokio::join!(dispatch_handle, logger_handle, server_handle);

    // Shutdown mDNS daemon
    if let Err(e) = mdns_daemon.shutdown() {
        tracing::error!("Failed to shutdown mDNS daemon: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
