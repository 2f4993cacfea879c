//! Aggregate metrics over the pool and the request ring

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::api::server::AppState;
use crate::error::HazeError;
use crate::models::{ProxyStatus, RequestRecord};

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_proxies: i64,
    pub healthy: i64,
    pub dead: i64,
    pub req_per_sec: f64,
    pub block_rate: f64,
    pub avg_latency_ms: f64,
    pub total_requests: usize,
    pub total_blocks: usize,
}

/// Snapshot of pool counts plus ring-derived rates
pub async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, HazeError> {
    let total_proxies = state.proxies.count_total().await?;
    let healthy = state.proxies.count_by_status(ProxyStatus::Healthy).await?;
    let dead = state.proxies.count_by_status(ProxyStatus::Dead).await?;

    let recent = state.requests.recent(100).await?;

    Ok(Json(compute_stats(total_proxies, healthy, dead, &recent)))
}

fn compute_stats(
    total_proxies: i64,
    healthy: i64,
    dead: i64,
    recent: &[RequestRecord],
) -> StatsResponse {
    let total_requests = recent.len();
    let total_blocks = recent.iter().filter(|r| r.blocked).count();

    let block_rate = if total_requests > 0 {
        round1(total_blocks as f64 / total_requests as f64 * 100.0)
    } else {
        0.0
    };

    let latencies: Vec<f64> = recent
        .iter()
        .filter(|r| r.latency_ms > 0.0)
        .map(|r| r.latency_ms)
        .collect();
    let avg_latency_ms = if latencies.is_empty() {
        0.0
    } else {
        round1(latencies.iter().sum::<f64>() / latencies.len() as f64)
    };

    let now = Utc::now();
    let last_minute = recent
        .iter()
        .filter(|r| (now - r.ts).num_seconds() < 60)
        .count();
    let req_per_sec = round2(last_minute as f64 / 60.0);

    StatsResponse {
        total_proxies,
        healthy,
        dead,
        req_per_sec,
        block_rate,
        avg_latency_ms,
        total_requests,
        total_blocks,
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
