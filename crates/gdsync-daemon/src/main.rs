//! GDSync Daemon - Background synchronization service
//!
//! This binary wires the adapters to the engine and runs it:
//! - Loads the YAML configuration
//! - Opens the SQLite state store
//! - Builds the Google Drive provider from a bearer token
//! - Runs bootstrap (first run) and the continuous change loop
//! - Shuts down gracefully on SIGTERM/SIGINT
//!
//! The access token is supplied via `GDSYNC_ACCESS_TOKEN`; obtaining and
//! refreshing OAuth credentials is outside this process.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gdsync_core::config::Config;
use gdsync_core::ports::notifier::LogNotifier;
use gdsync_drive::{DriveClient, DriveRemote};
use gdsync_store::{DatabasePool, SqliteStateStore};
use gdsync_sync::SyncEngine;

/// Environment variable carrying the OAuth2 bearer token.
const TOKEN_ENV: &str = "GDSYNC_ACCESS_TOKEN";

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(config_path = %config_path.display(), "GDSync daemon starting (gdsyncd)");

    let errors = config.validate();
    if !errors.is_empty() {
        for err in &errors {
            error!(%err, "Invalid configuration");
        }
        anyhow::bail!("Configuration is invalid ({} errors)", errors.len());
    }

    let access_token = std::env::var(TOKEN_ENV)
        .with_context(|| format!("{TOKEN_ENV} must be set to a valid OAuth2 bearer token"))?;

    // State store
    let pool = DatabasePool::new(&config.store.db_path)
        .await
        .context("Failed to open state database")?;
    let store = Arc::new(SqliteStateStore::new(pool.pool().clone()));

    // Remote provider
    let client = match &config.remote.base_url {
        Some(base_url) => {
            // Test/stub servers serve uploads from the same base.
            DriveClient::with_base_url(&access_token, base_url.clone(), base_url.clone())
        }
        None => DriveClient::new(&access_token),
    };
    let remote = Arc::new(DriveRemote::new(client));

    let engine = SyncEngine::new(remote, store, Arc::new(LogNotifier), &config)
        .await
        .context("Failed to initialize sync engine")?;

    // Propagate OS signals into the engine's cancellation token.
    let signal_token = engine.cancellation_token();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let result = engine.start().await;

    match &result {
        Ok(()) => info!("GDSync daemon shut down gracefully"),
        Err(err) => error!(error = %err, "GDSync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
