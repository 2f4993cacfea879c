use crate::error::{HazeError, Result};
use sqlx::PgPool;
use tracing::info;

/// Run all database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    create_migrations_table(pool).await?;

    let migrations = get_migrations();

    for (version, name, sql) in migrations {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            // Migrations carry several statements, so run them over the
            // simple query protocol.
            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(HazeError::Database)?;

            record_migration(pool, version, name).await?;

            info!(version = version, name = name, "Migration applied");
        }
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(HazeError::Database)?;

    Ok(())
}

/// Check if a migration has been applied
async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let result = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await
    .map_err(HazeError::Database)?;

    Ok(result > 0)
}

/// Record a migration as applied
async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await
        .map_err(HazeError::Database)?;

    Ok(())
}

/// Get all migrations in order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "proxies_table", MIGRATION_001_PROXIES),
        (2, "settings_table", MIGRATION_002_SETTINGS),
        (3, "domain_overrides_table", MIGRATION_003_DOMAIN_OVERRIDES),
        (4, "request_log_table", MIGRATION_004_REQUEST_LOG),
    ]
}

// Migration 1: the proxy pool
const MIGRATION_001_PROXIES: &str = r#"
CREATE TABLE IF NOT EXISTS proxies (
    ip VARCHAR(45) NOT NULL,
    port INTEGER NOT NULL,
    protocol VARCHAR(20) NOT NULL DEFAULT 'http',
    source VARCHAR(255) NOT NULL DEFAULT '',
    country VARCHAR(2),
    latency_ms DOUBLE PRECISION NOT NULL DEFAULT 0,
    success_count BIGINT NOT NULL DEFAULT 0,
    fail_count BIGINT NOT NULL DEFAULT 0,
    total_checks BIGINT NOT NULL DEFAULT 0,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    health_score DOUBLE PRECISION NOT NULL DEFAULT 0,
    last_checked TIMESTAMPTZ,
    status VARCHAR(20) NOT NULL DEFAULT 'healthy',
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (ip, port)
);

CREATE INDEX IF NOT EXISTS idx_proxies_status ON proxies(status);
CREATE INDEX IF NOT EXISTS idx_proxies_country ON proxies(country);
CREATE INDEX IF NOT EXISTS idx_proxies_last_checked ON proxies(last_checked);

CREATE OR REPLACE FUNCTION update_updated_at_column()
RETURNS TRIGGER AS $$
BEGIN
    NEW.updated_at = NOW();
    RETURN NEW;
END;
$$ language 'plpgsql';

DROP TRIGGER IF EXISTS update_proxies_updated_at ON proxies;
CREATE TRIGGER update_proxies_updated_at
    BEFORE UPDATE ON proxies
    FOR EACH ROW
    EXECUTE FUNCTION update_updated_at_column();
"#;

// Migration 2: settings rows (rotation config lives under key 'rotation',
// seeded from the environment at first boot)
const MIGRATION_002_SETTINGS: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key VARCHAR(100) PRIMARY KEY,
    value JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

DROP TRIGGER IF EXISTS update_settings_updated_at ON settings;
CREATE TRIGGER update_settings_updated_at
    BEFORE UPDATE ON settings
    FOR EACH ROW
    EXECUTE FUNCTION update_updated_at_column();
"#;

// Migration 3: per-domain strategy overrides
const MIGRATION_003_DOMAIN_OVERRIDES: &str = r#"
CREATE TABLE IF NOT EXISTS domain_overrides (
    domain VARCHAR(255) PRIMARY KEY,
    strategy VARCHAR(20) NOT NULL,
    country VARCHAR(2),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

// Migration 4: the bounded request ring for the live feed and /api/requests
const MIGRATION_004_REQUEST_LOG: &str = r#"
CREATE TABLE IF NOT EXISTS request_log (
    id BIGSERIAL PRIMARY KEY,
    ts TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    method VARCHAR(10) NOT NULL,
    url TEXT NOT NULL,
    target_domain VARCHAR(255) NOT NULL DEFAULT '',
    proxy_addr VARCHAR(64) NOT NULL DEFAULT '',
    status INTEGER NOT NULL DEFAULT 0,
    latency_ms DOUBLE PRECISION NOT NULL DEFAULT 0,
    blocked BOOLEAN NOT NULL DEFAULT false,
    attempt INTEGER NOT NULL DEFAULT 1,
    strategy VARCHAR(20) NOT NULL DEFAULT '',
    error TEXT,
    response_headers JSONB NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_request_log_ts ON request_log(ts DESC);
"#;
