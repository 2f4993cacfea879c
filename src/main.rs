//! Haze Proxy Gateway - Entry Point
//!
//! Starts the gateway, the pool maintainer, and the control API with
//! graceful shutdown support.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod database;
mod error;
mod gateway;
mod maintainer;
mod models;
mod repository;
mod rotation;

use api::ApiServer;
use config::Config;
use database::Database;
use gateway::{GatewayHandler, GatewayHandlerConfig, GatewayServer, RequestLogger};
use maintainer::{Maintainer, MaintainerHandle};
use models::{RequestRecord, RotationConfig, Strategy};
use repository::{ProxyRepository, RequestLogRepository, RotationRepository};
use rotation::RotationEngine;

#[tokio::main]
async fn main() -> error::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config);

    info!("Starting Haze Proxy Gateway");

    // Connect to the store
    let db = Database::connect(&config.database, &config.database_url()).await?;
    db.run_migrations().await?;

    // Seed the rotation config from the environment at first boot
    let rotation_repo = RotationRepository::new(db.pool().clone());
    let defaults = rotation_defaults(&config);
    rotation_repo.ensure_config(&defaults).await?;

    // Publish the initial rotation snapshot
    let snapshot = rotation_repo.load_snapshot().await?;
    info!(strategy = %snapshot.config.strategy, "Rotation config loaded");
    let (snapshot_tx, snapshot_rx) = watch::channel(snapshot);
    let snapshot_tx = Arc::new(snapshot_tx);

    // Live-feed channel (bounded so slow consumers can never pile up)
    let (log_tx, _) = broadcast::channel::<RequestRecord>(1024);
    let logger = RequestLogger::new(RequestLogRepository::new(db.pool().clone()), log_tx);

    // Rotation engine
    let proxy_repo = ProxyRepository::new(db.pool().clone());
    let engine = Arc::new(RotationEngine::new(proxy_repo.clone(), snapshot_rx));

    // Shutdown plumbing
    let (shutdown_tx, _) = watch::channel(false);

    // Pool maintainer
    let (maintainer_handle, refresh_rx) = MaintainerHandle::new();
    let maintainer_handle = Arc::new(maintainer_handle);
    let maintainer = Maintainer::new(proxy_repo.clone(), config.maintainer.clone());
    let maintainer_shutdown = shutdown_tx.subscribe();
    let maintainer_task = tokio::spawn(async move {
        maintainer.run(refresh_rx, maintainer_shutdown).await;
    });

    // Gateway
    let active_connections = Arc::new(AtomicUsize::new(0));
    let handler_config = GatewayHandlerConfig {
        max_retries: config.gateway.max_retries,
        connect_timeout: Duration::from_secs(config.gateway.connect_timeout),
        request_timeout: Duration::from_secs(config.gateway.request_timeout),
    };
    let handler = Arc::new(GatewayHandler::new(
        engine.clone(),
        proxy_repo.clone(),
        logger.clone(),
        handler_config,
        active_connections.clone(),
    ));
    let gateway = GatewayServer::new(config.gateway.clone(), handler, active_connections);

    // Control API
    let api = ApiServer::new(
        config.api.clone(),
        db.clone(),
        logger.clone(),
        snapshot_tx.clone(),
        maintainer_handle.clone(),
    );

    let gateway_shutdown = shutdown_tx.subscribe();
    let api_shutdown = shutdown_tx.subscribe();

    let gateway_task = tokio::spawn(async move {
        if let Err(e) = gateway.run(gateway_shutdown).await {
            error!("Gateway error: {}", e);
        }
    });

    let api_task = tokio::spawn(async move {
        if let Err(e) = api.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!(
        "Servers started - Gateway: {}, API: {}",
        config.gateway_addr(),
        config.api_addr()
    );

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(gateway_task, api_task, maintainer_task);

    db.close().await;
    info!("Haze Proxy Gateway stopped");
    Ok(())
}

/// Build the rotation defaults from the environment, falling back on an
/// unknown strategy name
fn rotation_defaults(config: &Config) -> RotationConfig {
    let strategy = match Strategy::from_str(&config.rotation.strategy) {
        Some(s) => s,
        None => {
            warn!(
                strategy = %config.rotation.strategy,
                "Unknown rotation strategy in environment, using per-request"
            );
            Strategy::PerRequest
        }
    };

    RotationConfig {
        strategy,
        session_ttl_seconds: config.rotation.session_ttl_seconds,
        rotation_interval_seconds: config.rotation.rotation_interval_seconds,
    }
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("haze={},tower_http=warn", config.log.level).into());

    if config.log.format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
