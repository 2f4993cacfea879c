use crate::error::Result;
use crate::models::RequestRecord;
use sqlx::PgPool;

/// The request ring keeps this many records at most
pub const RING_CAPACITY: i64 = 500;

/// Repository for the bounded request ring
#[derive(Clone)]
pub struct RequestLogRepository {
    pool: PgPool,
}

impl RequestLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a record and trim the ring to its capacity
    pub async fn push(&self, record: &RequestRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO request_log
                (ts, method, url, target_domain, proxy_addr, status,
                 latency_ms, blocked, attempt, strategy, error, response_headers)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.ts)
        .bind(&record.method)
        .bind(&record.url)
        .bind(&record.target_domain)
        .bind(&record.proxy_addr)
        .bind(record.status)
        .bind(record.latency_ms)
        .bind(record.blocked)
        .bind(record.attempt)
        .bind(&record.strategy)
        .bind(&record.error)
        .bind(&record.response_headers)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM request_log
            WHERE id NOT IN (SELECT id FROM request_log ORDER BY id DESC LIMIT $1)
            "#,
        )
        .bind(RING_CAPACITY)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent records, newest first
    pub async fn recent(&self, count: i64) -> Result<Vec<RequestRecord>> {
        let count = count.clamp(1, RING_CAPACITY);

        let records = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT ts, method, url, target_domain, proxy_addr, status,
                   latency_ms, blocked, attempt, strategy, error, response_headers
            FROM request_log
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(count)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
