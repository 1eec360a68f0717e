//! Ephemeral Gallery - short-lived image wall
//!
//! Accepts image uploads with a short comment, keeps only the most recent
//! ones and lets each expire a few seconds after it was posted.

mod error;
mod server;
mod types;

use crate::error::Result;
use crate::server::{start_server, ServerState, SharedState};
use crate::types::GalleryConfig;
use ephemeral_store::ImageStore;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("ephemeral_gallery=info".parse()?)
        .add_directive("ephemeral_store=info".parse()?);

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

    info!("Starting Ephemeral Gallery...");

    let config = GalleryConfig::from_env();
    info!("Port: {}", config.port);
    info!("Upload dir: {:?}", config.store.blob_dir);
    info!("Data file: {:?}", config.store.data_file);
    info!("Max images: {}", config.store.capacity);
    info!("Image lifetime: {:?}", config.store.lifetime);
    info!("Max upload size: {} bytes", config.max_upload_bytes);

    let store = ImageStore::open(config.store.clone()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reclaimer = store.spawn_reclaimer(shutdown_rx);

    let state: SharedState = Arc::new(ServerState::new(store));

    let served = start_server(
        state,
        config.port,
        config.max_upload_bytes,
        shutdown_signal(),
    )
    .await;

    // Stop the reclaimer whether the server exited cleanly or not
    let _ = shutdown_tx.send(true);
    if let Err(e) = reclaimer.await {
        error!("Reclaimer task failed: {}", e);
    }

    served?;
    info!("Shut down cleanly");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}
