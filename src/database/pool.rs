use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{HazeError, Result};

/// Shared handle to the store
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open the connection pool and verify the store answers
    pub async fn connect(config: &DatabaseConfig, url: &str) -> Result<Self> {
        info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            "Connecting to store"
        );

        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(30 * 60))
            .max_lifetime(Duration::from_secs(60 * 60))
            .connect(url)
            .await
            .map_err(|e| HazeError::DatabaseConnection(e.to_string()))?;

        let db = Self { pool };
        let rtt = db.ping().await?;
        info!(rtt_ms = rtt.as_millis() as u64, "Store reachable");

        Ok(db)
    }

    /// Wrap an existing pool (used in tests)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query, returning the measured latency
    pub async fn ping(&self) -> Result<Duration> {
        let start = std::time::Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(start.elapsed())
    }

    /// Apply any migrations the store has not seen yet
    pub async fn run_migrations(&self) -> Result<()> {
        super::migrations::run_migrations(&self.pool).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
