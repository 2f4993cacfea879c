//! Control API server using axum

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ApiConfig;
use crate::database::Database;
use crate::error::Result;
use crate::gateway::RequestLogger;
use crate::maintainer::MaintainerHandle;
use crate::models::RotationSnapshot;
use crate::repository::{ProxyRepository, RequestLogRepository, RotationRepository};

use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub secret: String,
    pub proxies: ProxyRepository,
    pub rotation: RotationRepository,
    pub requests: RequestLogRepository,
    pub logger: RequestLogger,
    pub snapshot_tx: Arc<watch::Sender<RotationSnapshot>>,
    pub maintainer: Arc<MaintainerHandle>,
}

/// API server
pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(
        config: ApiConfig,
        db: Database,
        logger: RequestLogger,
        snapshot_tx: Arc<watch::Sender<RotationSnapshot>>,
        maintainer: Arc<MaintainerHandle>,
    ) -> Self {
        let pool = db.pool().clone();
        let state = AppState {
            db,
            secret: config.secret.clone(),
            proxies: ProxyRepository::new(pool.clone()),
            rotation: RotationRepository::new(pool.clone()),
            requests: RequestLogRepository::new(pool),
            logger,
            snapshot_tx,
            maintainer,
        };

        Self { config, state }
    }

    /// Build the router with CORS and request tracing
    fn build_router(&self) -> Router {
        let cors = if self.config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<axum::http::HeaderValue> = self
                .config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        };

        routes::create_router(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|_| crate::error::HazeError::InvalidConfig("Invalid API address".into()))?;

        let router = self.build_router();

        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| crate::error::HazeError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
