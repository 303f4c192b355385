//! Gadgetron Storage Manager - path-indexed blob storage over HTTP

use clap::Parser;
use gadgetron_storage_server::{
    start_server, Config, GarbageCollector, Result, ServerState, SharedState, Storage,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter =
        EnvFilter::from_default_env().add_directive("gadgetron_storage_server=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    let config = Config::parse();
    info!(
        "Gadgetron Storage Server v. {}",
        env!("CARGO_PKG_VERSION")
    );
    info!("Storage dir: {:?}", config.storage_dir);
    info!("GC interval: {} seconds", config.gc_interval_secs);
    info!("Session timeout: {} seconds", config.session_timeout_secs);

    let storage = Storage::open(config.blob_dir(), &config.database_url()).await?;
    storage.reconcile().await?;

    // Garbage collector runs until the server has stopped
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collector = GarbageCollector::new(
        storage.clone(),
        config.gc_interval(),
        config.orphan_grace(),
    );
    let gc_task = tokio::spawn(collector.run(shutdown_rx));

    let state: SharedState = Arc::new(ServerState::new(storage, config.namespaces()));
    start_server(state, &config.address, config.port, shutdown_signal()).await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = gc_task.await {
        error!("Garbage collector task failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
