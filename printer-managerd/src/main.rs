mod api;
mod config;
mod mdns;
mod reconciler;
mod registry;
mod status;

use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use mdns_sd::ServiceDaemon;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::reconciler::Reconciler;
use crate::registry::{hash, Registry, RegistryHandle};
use crate::status::StatusClient;

const DEFAULT_CONFIG_PATH: &str = "/etc/printer-manager/managerd.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("printer_managerd=info"))
        )
        .init();

    tracing::info!("Starting printer-managerd");

    let config = load_config()?;

    // Load the registry; stale reachability is dropped here
    let mut registry = Registry::new(&config.registry.snapshot_path);
    registry.load();

    let initial_hash = hash::compute_hash(&registry.list());
    let (hash_tx, hash_rx) = watch::channel(initial_hash);
    let registry = RegistryHandle::spawn(registry, hash_tx);

    let status_client = StatusClient::new(config.engine.probe_timeout())?;
    let reconciler = Arc::new(Reconciler::new(registry.clone(), Arc::new(status_client)));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    let (event_tx, event_rx) = mpsc::channel(config.engine.event_queue_capacity);

    // Spawn mDNS discovery source
    let mdns_daemon = if config.discovery.enabled {
        let daemon = ServiceDaemon::new().context("Failed to create mDNS daemon")?;
        if let Some(interface) = &config.discovery.interface {
            daemon
                .disable_interface(mdns_sd::IfKind::All)
                .context("Failed to disable default interfaces")?;
            daemon
                .enable_interface(interface.as_str())
                .with_context(|| format!("Failed to enable interface {}", interface))?;
        }
        Some(daemon)
    } else {
        tracing::info!("mDNS discovery disabled");
        None
    };

    let browser_handle = mdns_daemon.clone().map(|daemon| {
        let service_type = config.discovery.service_type.clone();
        let reannounce = config.discovery.reannounce_interval();
        let browser_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) =
                mdns::browser::run_browser(daemon, service_type, reannounce, event_tx, browser_cancel).await
            {
                tracing::error!("mDNS browser error: {:#}", e);
            }
        })
    });

    // Spawn the two reconciliation loops
    let events_handle = tokio::spawn(reconciler::run_events(
        reconciler.clone(),
        event_rx,
        cancel.clone(),
    ));
    let sweep_handle = tokio::spawn(reconciler::run_sweeps(
        reconciler.clone(),
        config.engine.sweep_interval(),
        cancel.clone(),
    ));

    // Build API router
    let app = api::routes::router(api::routes::AppState {
        registry: registry.clone(),
        hash_rx,
    });

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

    // Trigger cancellation; in-flight probes observe the same token
    cancel.cancel();

    let (events, sweeps, _) = tokio::join!(events_handle, sweep_handle, server_handle);
    for result in [events, sweeps] {
        match result {
            Ok(Err(e)) => tracing::error!("Reconciliation loop error: {:#}", e),
            Err(e) => tracing::error!("Reconciliation task panicked: {}", e),
            Ok(Ok(())) => {}
        }
    }
    if let Some(handle) = browser_handle {
        let _ = handle.await;
    }

    // Shutdown registry thread
    if let Err(e) = registry.shutdown().await {
        tracing::error!("Failed to shutdown registry: {}", e);
    }

    // Shutdown mDNS daemon
    if let Some(daemon) = mdns_daemon {
        if let Err(e) = daemon.shutdown() {
            tracing::error!("Failed to shutdown mDNS daemon: {}", e);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Config from the first argument, else the default path if it exists,
/// else built-in defaults
fn load_config() -> Result<Config> {
    if let Some(path) = std::env::args().nth(1) {
        let config = Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path))?;
        tracing::info!("Loaded config from {}", path);
        return Ok(config);
    }

    if Path::new(DEFAULT_CONFIG_PATH).exists() {
        let config = Config::load(DEFAULT_CONFIG_PATH)?;
        tracing::info!("Loaded config from {}", DEFAULT_CONFIG_PATH);
        return Ok(config);
    }

    tracing::info!("No config file, using defaults");
    Ok(Config::default())
}
