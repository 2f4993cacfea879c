//! Bounded-concurrency health probing
//!
//! Each probe issues a GET to the check URL through the proxy and passes only
//! when the response is a 200 whose JSON body carries an `origin` field with
//! a syntactically valid IP. Everything else counts as a failure.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::MaintainerConfig;
use crate::error::Result;
use crate::models::ProxyRecord;
use crate::repository::ProxyRepository;

/// Probe target fetched through each proxy
pub const HEALTH_CHECK_URL: &str = "http://httpbin.org/ip";

/// Outcome of a probe pass
#[derive(Debug, Clone, Default)]
pub struct ProbeStats {
    pub total: usize,
    pub healthy: usize,
    pub failed: usize,
}

/// Runs probe passes over the pool
pub struct HealthProber {
    pool: ProxyRepository,
    config: MaintainerConfig,
    /// Keys with a probe currently in flight; a key is never probed twice
    /// concurrently.
    in_flight: Arc<DashSet<String>>,
}

impl HealthProber {
    pub fn new(pool: ProxyRepository, config: MaintainerConfig) -> Self {
        Self {
            pool,
            config,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Probe every target, at most `max_concurrent_checks` at once
    pub async fn run_pass(&self, targets: Vec<ProxyRecord>) -> Result<ProbeStats> {
        if targets.is_empty() {
            debug!("Probe pass skipped, nothing stale");
            return Ok(ProbeStats::default());
        }

        info!(count = targets.len(), "Probe pass starting");

        let timeout = Duration::from_secs(self.config.health_check_timeout);
        let tasks: Vec<_> = targets
            .into_iter()
            .filter_map(|proxy| {
                let key = proxy.key();
                if !self.in_flight.insert(key.clone()) {
                    debug!(proxy = %key, "Probe already in flight, skipping");
                    return None;
                }

                let pool = self.pool.clone();
                let in_flight = Arc::clone(&self.in_flight);
                Some(async move {
                    let outcome = probe_proxy(&proxy, timeout).await;

                    let result = match outcome {
                        Ok(latency_ms) => {
                            debug!(proxy = %key, latency_ms, "Probe passed");
                            pool.record_success(&proxy.ip, proxy.port as u16, latency_ms)
                                .await
                                .map(|_| true)
                        }
                        Err(reason) => {
                            debug!(proxy = %key, reason = %reason, "Probe failed");
                            pool.record_failure(&proxy.ip, proxy.port as u16)
                                .await
                                .map(|_| false)
                        }
                    };

                    in_flight.remove(&key);

                    match result {
                        Ok(healthy) => healthy,
                        Err(e) => {
                            warn!(proxy = %key, "Failed to record probe outcome: {}", e);
                            false
                        }
                    }
                })
            })
            .collect();

        let results = run_bounded(tasks, self.config.max_concurrent_checks.max(1)).await;

        let total = results.len();
        let healthy = results.iter().filter(|&&h| h).count();
        let stats = ProbeStats {
            total,
            healthy,
            failed: total - healthy,
        };

        info!(
            total = stats.total,
            healthy = stats.healthy,
            failed = stats.failed,
            "Probe pass complete"
        );

        Ok(stats)
    }
}

/// Drive `tasks` with at most `limit` in flight at any moment
pub(crate) async fn run_bounded<F, T>(tasks: Vec<F>, limit: usize) -> Vec<T>
where
    F: Future<Output = T>,
{
    futures::stream::iter(tasks)
        .buffer_unordered(limit)
        .collect()
        .await
}

/// Probe one proxy. Returns the measured latency on success, the failure
/// reason otherwise.
async fn probe_proxy(proxy: &ProxyRecord, timeout: Duration) -> std::result::Result<f64, String> {
    let client = reqwest::Client::builder()
        .proxy(
            reqwest::Proxy::http(proxy.url()).map_err(|e| format!("bad proxy url: {}", e))?,
        )
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| format!("client build failed: {}", e))?;

    let start = Instant::now();
    let response = client
        .get(HEALTH_CHECK_URL)
        .send()
        .await
        .map_err(|e| format!("request failed: {}", e))?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(format!("status {}", response.status().as_u16()));
    }

    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| format!("malformed JSON: {}", e))?;

    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    if origin_is_valid_ip(&body) {
        Ok((latency_ms * 10.0).round() / 10.0)
    } else {
        Err("origin is not a valid IP".to_string())
    }
}

/// Pass criterion: the body has an `origin` field holding a valid IP
fn origin_is_valid_ip(body: &serde_json::Value) -> bool {
    body.get("origin")
        .and_then(|v| v.as_str())
        .map(|origin| origin.trim().parse::<IpAddr>().is_ok())
        .unwrap_or(false)
}
