//! Pool maintainer
//!
//! Two cooperating loops: a refresh loop that scrapes the configured proxy
//! sources, deduplicates, and upserts into the pool; and a probe loop that
//! health-checks stale records under a concurrency bound and evicts the dead.

pub mod probe;
pub mod scrape;

pub use probe::HealthProber;

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{error, info, instrument, warn};

use crate::config::MaintainerConfig;
use crate::error::Result;
use crate::models::ProxyStatus;
use crate::repository::ProxyRepository;

/// The pool maintainer service
pub struct Maintainer {
    pool: ProxyRepository,
    config: MaintainerConfig,
    http: reqwest::Client,
    prober: HealthProber,
}

impl Maintainer {
    pub fn new(pool: ProxyRepository, config: MaintainerConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.source_timeout))
            .build()
            .expect("failed to build maintainer HTTP client");

        let prober = HealthProber::new(pool.clone(), config.clone());

        Self {
            pool,
            config,
            http,
            prober,
        }
    }

    /// Run both loops until shutdown. `refresh_rx` carries manual refresh
    /// triggers from the REST API.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        mut refresh_rx: mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            refresh_interval = self.config.pool_refresh_interval,
            probe_interval = self.config.health_check_interval,
            "Starting pool maintainer"
        );

        // Initial refresh at startup
        if let Err(e) = self.refresh().await {
            error!("Initial pool refresh failed: {}", e);
        }

        let mut refresh_tick = interval(Duration::from_secs(self.config.pool_refresh_interval));
        refresh_tick.tick().await; // skip the immediate tick
        let mut probe_tick = interval(Duration::from_secs(self.config.health_check_interval));
        probe_tick.tick().await;

        let mut triggers_open = true;

        loop {
            tokio::select! {
                _ = refresh_tick.tick() => {
                    if let Err(e) = self.refresh().await {
                        error!("Pool refresh failed: {}", e);
                    }
                }
                _ = probe_tick.tick() => {
                    if let Err(e) = self.probe_stale().await {
                        error!("Probe pass failed: {}", e);
                    }
                    if let Err(e) = self.pool.flush_dead().await {
                        warn!("Flush of dead proxies failed: {}", e);
                    }
                }
                triggered = refresh_rx.recv(), if triggers_open => {
                    match triggered {
                        Some(()) => {
                            info!("Manual pool refresh triggered");
                            if let Err(e) = self.refresh().await {
                                error!("Triggered pool refresh failed: {}", e);
                            }
                        }
                        None => triggers_open = false,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Pool maintainer shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One full refresh: scrape, dedup, upsert, top up, probe
    pub async fn refresh(&self) -> Result<RefreshStats> {
        let batches = scrape::fetch_all_sources(&self.http).await;
        let unique = scrape::dedup_first_wins(batches);
        let scraped = unique.len();

        for record in &unique {
            if let Err(e) = self.pool.add(record).await {
                warn!(proxy = %record.key(), "Failed to upsert proxy: {}", e);
            }
        }

        info!(scraped, "Scrape complete");

        // Top up from Webshare when the healthy pool is thin
        let healthy_before = self.pool.count_by_status(ProxyStatus::Healthy).await?;
        if self.config.webshare_enabled
            && !self.config.webshare_api_key.is_empty()
            && (healthy_before as usize) < self.config.min_pool_size
        {
            info!(
                healthy = healthy_before,
                min = self.config.min_pool_size,
                "Healthy pool below minimum, trying Webshare fallback"
            );
            match scrape::fetch_webshare(&self.http, &self.config.webshare_api_key).await {
                Ok(extra) => {
                    for record in scrape::dedup_first_wins(vec![extra]) {
                        if let Err(e) = self.pool.add(&record).await {
                            warn!(proxy = %record.key(), "Failed to upsert Webshare proxy: {}", e);
                        }
                    }
                }
                Err(e) => error!("Webshare fallback failed: {}", e),
            }
        }

        let probe_stats = self.probe_stale().await?;

        Ok(RefreshStats {
            scraped,
            healthy: probe_stats.healthy,
            failed: probe_stats.failed,
        })
    }

    /// Probe every record that is stale or has never been checked
    async fn probe_stale(&self) -> Result<probe::ProbeStats> {
        let targets = self
            .pool
            .stale_for_probe(self.config.health_check_interval)
            .await?;

        self.prober.run_pass(targets).await
    }
}

/// Outcome of one refresh cycle
#[derive(Debug, Clone, serde::Serialize)]
pub struct RefreshStats {
    pub scraped: usize,
    pub healthy: usize,
    pub failed: usize,
}

/// Handle for requesting maintainer refreshes
pub struct MaintainerHandle {
    refresh_tx: mpsc::Sender<()>,
}

impl MaintainerHandle {
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(4);
        (Self { refresh_tx: tx }, rx)
    }

    /// Request an immediate refresh; a full trigger queue means one is
    /// already pending, which is just as good.
    pub fn trigger_refresh(&self) {
        let _ = self.refresh_tx.try_send(());
    }
}
