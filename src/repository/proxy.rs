use crate::error::Result;
use crate::models::{PaginatedResponse, ProxyListParams, ProxyRecord, ProxyStatus};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

const PROXY_COLUMNS: &str = r#"ip, port, protocol, source, country, latency_ms,
       success_count, fail_count, total_checks, consecutive_failures,
       health_score, last_checked, status, last_error, created_at, updated_at"#;

/// Repository implementing the pool contract over the store
#[derive(Clone)]
pub struct ProxyRepository {
    pool: PgPool,
}

impl ProxyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a proxy by its `ip:port` key parts
    pub async fn get(&self, ip: &str, port: u16) -> Result<Option<ProxyRecord>> {
        let proxy = sqlx::query_as::<_, ProxyRecord>(&format!(
            "SELECT {PROXY_COLUMNS} FROM proxies WHERE ip = $1 AND port = $2"
        ))
        .bind(ip)
        .bind(port as i32)
        .fetch_optional(&self.pool)
        .await?;

        Ok(proxy)
    }

    /// Upsert a proxy by `ip:port`. Existing records keep their counters,
    /// status and source (first source wins); a missing country is filled in.
    pub async fn add(&self, record: &ProxyRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO proxies (ip, port, protocol, source, country)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (ip, port) DO UPDATE
            SET country = COALESCE(proxies.country, EXCLUDED.country)
            "#,
        )
        .bind(&record.ip)
        .bind(record.port)
        .bind(&record.protocol)
        .bind(&record.source)
        .bind(&record.country)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Hard-delete a proxy
    pub async fn remove(&self, ip: &str, port: u16) -> Result<bool> {
        let result = sqlx::query("DELETE FROM proxies WHERE ip = $1 AND port = $2")
            .bind(ip)
            .bind(port as i32)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a proxy dead, keeping its counters for audit. Idempotent.
    pub async fn mark_dead(&self, ip: &str, port: u16, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE proxies
            SET status = 'dead', last_error = $3
            WHERE ip = $1 AND port = $2
            "#,
        )
        .bind(ip)
        .bind(port as i32)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        debug!(proxy = %format!("{}:{}", ip, port), reason = reason, "Marked proxy dead");
        Ok(())
    }

    /// Record a successful probe or request. A single statement keeps the
    /// counter updates atomic under concurrent probes and gateway traffic.
    pub async fn record_success(&self, ip: &str, port: u16, latency_ms: f64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE proxies
            SET success_count = success_count + 1,
                total_checks = total_checks + 1,
                consecutive_failures = 0,
                latency_ms = $3,
                last_checked = NOW(),
                status = 'healthy',
                last_error = NULL,
                health_score = (success_count + 1)::double precision
                               / (total_checks + 1)::double precision * 100.0
            WHERE ip = $1 AND port = $2
            "#,
        )
        .bind(ip)
        .bind(port as i32)
        .bind(latency_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a failed probe or request. Three consecutive failures flip the
    /// record to dead.
    pub async fn record_failure(&self, ip: &str, port: u16) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE proxies
            SET fail_count = fail_count + 1,
                total_checks = total_checks + 1,
                consecutive_failures = consecutive_failures + 1,
                last_checked = NOW(),
                health_score = success_count::double precision
                               / (total_checks + 1)::double precision * 100.0,
                status = CASE
                    WHEN consecutive_failures + 1 >= 3 THEN 'dead'
                    ELSE status
                END
            WHERE ip = $1 AND port = $2
            "#,
        )
        .bind(ip)
        .bind(port as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All records eligible for selection
    pub async fn get_healthy(&self) -> Result<Vec<ProxyRecord>> {
        let proxies = sqlx::query_as::<_, ProxyRecord>(&format!(
            r#"
            SELECT {PROXY_COLUMNS}
            FROM proxies
            WHERE status = 'healthy'
            ORDER BY health_score DESC, latency_ms ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(proxies)
    }

    /// Paginated listing with status/country filters
    pub async fn list(&self, params: &ProxyListParams) -> Result<PaginatedResponse<ProxyRecord>> {
        let page = params.page.unwrap_or(1).max(1);
        let per_page = params.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * per_page;

        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM proxies WHERE 1=1");
        push_filters(&mut count_query, params);

        let total: i64 = count_query.build_query_scalar().fetch_one(&self.pool).await?;

        let mut data_query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {PROXY_COLUMNS} FROM proxies WHERE 1=1"
        ));
        push_filters(&mut data_query, params);

        data_query
            .push(" ORDER BY health_score DESC, latency_ms ASC LIMIT ")
            .push_bind(per_page)
            .push(" OFFSET ")
            .push_bind(offset);

        let proxies: Vec<ProxyRecord> = data_query.build_query_as().fetch_all(&self.pool).await?;

        Ok(PaginatedResponse::new(proxies, total, page, per_page))
    }

    /// Records due for a probe: never checked, or stale beyond the interval
    pub async fn stale_for_probe(&self, interval_secs: u64) -> Result<Vec<ProxyRecord>> {
        let proxies = sqlx::query_as::<_, ProxyRecord>(&format!(
            r#"
            SELECT {PROXY_COLUMNS}
            FROM proxies
            WHERE last_checked IS NULL
               OR last_checked < NOW() - make_interval(secs => $1)
            "#
        ))
        .bind(interval_secs as f64)
        .fetch_all(&self.pool)
        .await?;

        Ok(proxies)
    }

    /// Remove every dead record. Returns the number flushed.
    pub async fn flush_dead(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM proxies WHERE status = 'dead'")
            .execute(&self.pool)
            .await?;

        let flushed = result.rows_affected();
        if flushed > 0 {
            info!(count = flushed, "Flushed dead proxies");
        }

        Ok(flushed)
    }

    /// Get proxy count by status
    pub async fn count_by_status(&self, status: ProxyStatus) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM proxies WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Get total proxy count
    pub async fn count_total(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM proxies")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, params: &ProxyListParams) {
    if let Some(ref status) = params.status {
        if !status.is_empty() && status != "all" {
            query.push(" AND status = ").push_bind(status.clone());
        }
    }
    if let Some(ref country) = params.country {
        if !country.is_empty() {
            query.push(" AND country = ").push_bind(country.clone());
        }
    }
}
