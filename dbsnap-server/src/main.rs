mod config;
mod error;
mod routes;
mod services;
mod state;

use crate::config::AppConfig;
use crate::services::backup_scheduler::BackupScheduler;
use crate::state::AppState;
use dbsnap::{BackupService, MongoStore};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .init();

    tracing::info!("Starting snapshot server on port {}", config.port);

    // Ensure the backup directory exists
    std::fs::create_dir_all(&config.backup.dir)?;

    // Connect to the database
    let store = Arc::new(MongoStore::connect(&config.mongodb_uri).await?);
    let backups = BackupService::new(store.clone(), config.backup.clone());
    tracing::info!(
        database = %backups.database_name(),
        dir = %config.backup.dir.display(),
        max_backups = config.backup.max_backups,
        "Backup service ready"
    );

    // Build application state
    let state = Arc::new(AppState::new(backups, config.clone()));

    // Initialize cron scheduler
    let scheduler = match BackupScheduler::new(state.clone()).await {
        Ok(s) => {
            if let Err(e) = s.schedule_export(&config.backup_cron).await {
                tracing::warn!("Failed to schedule backups: {}", e);
            }
            if let Err(e) = s.start().await {
                tracing::warn!("Failed to start scheduler: {}", e);
            }
            Some(s)
        }
        Err(e) => {
            tracing::warn!("Failed to create scheduler: {}", e);
            None
        }
    };

    // Build router
    let app = routes::create_router(state.clone());

    // Start HTTP server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");

    // Stop scheduler
    if let Some(s) = scheduler {
        if let Err(e) = s.shutdown().await {
            tracing::warn!("Scheduler shutdown error: {}", e);
        }
    }

    // Let a running export or restore finish before exiting
    if state.backups.is_busy().await {
        tracing::info!("Waiting for the running backup to finish");
        state.backups.wait_idle().await;
    }
    store.shutdown().await;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
