use crate::error::{HazeError, Result};
use crate::models::{DomainOverride, RotationConfig, RotationSnapshot};
use sqlx::PgPool;
use tracing::info;

const ROTATION_KEY: &str = "rotation";

/// Repository for the rotation config row and domain overrides
#[derive(Clone)]
pub struct RotationRepository {
    pool: PgPool,
}

impl RotationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the rotation config, falling back to defaults when unset
    pub async fn get_config(&self) -> Result<RotationConfig> {
        let value: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = $1")
                .bind(ROTATION_KEY)
                .fetch_optional(&self.pool)
                .await?;

        match value {
            Some(v) => serde_json::from_value(v).map_err(|e| {
                HazeError::Internal(format!("Failed to parse rotation config: {}", e))
            }),
            None => Ok(RotationConfig::default()),
        }
    }

    /// Seed the rotation config at first boot; an existing row wins
    pub async fn ensure_config(&self, defaults: &RotationConfig) -> Result<()> {
        let json_value = serde_json::to_value(defaults)
            .map_err(|e| HazeError::Internal(format!("Failed to serialize config: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO settings (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(ROTATION_KEY)
        .bind(json_value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist the rotation config
    pub async fn set_config(&self, config: &RotationConfig) -> Result<()> {
        let json_value = serde_json::to_value(config)
            .map_err(|e| HazeError::Internal(format!("Failed to serialize config: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO settings (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = NOW()
            "#,
        )
        .bind(ROTATION_KEY)
        .bind(json_value)
        .execute(&self.pool)
        .await?;

        info!(strategy = %config.strategy, "Updated rotation config");
        Ok(())
    }

    /// List all domain overrides
    pub async fn list_overrides(&self) -> Result<Vec<DomainOverride>> {
        let overrides = sqlx::query_as::<_, DomainOverride>(
            "SELECT domain, strategy, country FROM domain_overrides ORDER BY domain",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(overrides)
    }

    /// Upsert a domain override (domain is stored lowercased)
    pub async fn set_override(&self, override_: &DomainOverride) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO domain_overrides (domain, strategy, country)
            VALUES ($1, $2, $3)
            ON CONFLICT (domain) DO UPDATE SET strategy = $2, country = $3
            "#,
        )
        .bind(override_.domain.to_lowercase())
        .bind(&override_.strategy)
        .bind(&override_.country)
        .execute(&self.pool)
        .await?;

        info!(domain = %override_.domain, strategy = %override_.strategy, "Set domain override");
        Ok(())
    }

    /// Delete a domain override. Returns false when it did not exist.
    pub async fn delete_override(&self, domain: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM domain_overrides WHERE domain = $1")
            .bind(domain.to_lowercase())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Load the full snapshot published to the engine's watch channel
    pub async fn load_snapshot(&self) -> Result<RotationSnapshot> {
        let config = self.get_config().await?;
        let overrides = self
            .list_overrides()
            .await?
            .into_iter()
            .map(|o| (o.domain.clone(), o))
            .collect();

        Ok(RotationSnapshot { config, overrides })
    }
}
