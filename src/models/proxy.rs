use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Proxy health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    #[default]
    Healthy,
    Dead,
}

impl ProxyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyStatus::Healthy => "healthy",
            ProxyStatus::Dead => "dead",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "healthy" => Some(ProxyStatus::Healthy),
            "dead" => Some(ProxyStatus::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pool entry: one upstream proxy keyed by `ip:port`
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProxyRecord {
    pub ip: String,
    pub port: i32,
    pub protocol: String,
    /// Which upstream list contributed this proxy (first seen wins)
    pub source: String,
    pub country: Option<String>,
    /// Latency of the last successful probe, in milliseconds
    pub latency_ms: f64,
    pub success_count: i64,
    pub fail_count: i64,
    pub total_checks: i64,
    pub consecutive_failures: i32,
    /// Derived: 100 * success_count / total_checks
    pub health_score: f64,
    pub last_checked: Option<DateTime<Utc>>,
    pub status: String, // Stored as string in DB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProxyRecord {
    /// Create a fresh, never-checked record
    pub fn new(ip: impl Into<String>, port: u16, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            ip: ip.into(),
            port: port as i32,
            protocol: "http".to_string(),
            source: source.into(),
            country: None,
            latency_ms: 0.0,
            success_count: 0,
            fail_count: 0,
            total_checks: 0,
            consecutive_failures: 0,
            health_score: 0.0,
            last_checked: None,
            status: ProxyStatus::Healthy.as_str().to_string(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Unique pool key, `ip:port`
    pub fn key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Proxy URL used for dialing and probe clients
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }

    /// Get the status enum
    pub fn status_enum(&self) -> Option<ProxyStatus> {
        ProxyStatus::from_str(&self.status)
    }

    pub fn is_healthy(&self) -> bool {
        self.status_enum() == Some(ProxyStatus::Healthy)
    }

    /// Recompute the derived health score from the counters
    pub fn computed_health_score(&self) -> f64 {
        if self.total_checks == 0 {
            0.0
        } else {
            (self.success_count as f64 / self.total_checks as f64) * 100.0
        }
    }
}

/// Proxy list query parameters
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProxyListParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
    pub country: Option<String>,
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: i64, per_page: i64) -> Self {
        let total_pages = (total as f64 / per_page as f64).ceil() as i64;
        PaginatedResponse {
            data,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_status_parsing() {
        assert_eq!(ProxyStatus::from_str("healthy"), Some(ProxyStatus::Healthy));
        assert_eq!(ProxyStatus::from_str("DEAD"), Some(ProxyStatus::Dead));
        assert_eq!(ProxyStatus::from_str("idle"), None);

        assert_eq!(ProxyStatus::Healthy.to_string(), "healthy");
        assert_eq!(ProxyStatus::Dead.to_string(), "dead");
    }

    #[test]
    fn test_new_record_defaults() {
        let p = ProxyRecord::new("1.2.3.4", 8080, "proxyscrape");
        assert_eq!(p.key(), "1.2.3.4:8080");
        assert_eq!(p.url(), "http://1.2.3.4:8080");
        assert_eq!(p.protocol, "http");
        assert_eq!(p.source, "proxyscrape");
        assert_eq!(p.total_checks, 0);
        assert_eq!(p.health_score, 0.0);
        assert!(p.last_checked.is_none());
        assert!(p.is_healthy());
    }

    #[test]
    fn test_computed_health_score() {
        let mut p = ProxyRecord::new("1.2.3.4", 8080, "test");
        assert_eq!(p.computed_health_score(), 0.0);

        p.success_count = 7;
        p.fail_count = 3;
        p.total_checks = 10;
        assert!((p.computed_health_score() - 70.0).abs() < 1e-9);

        // Counters always satisfy total = success + fail
        assert_eq!(p.total_checks, p.success_count + p.fail_count);

        // Score stays inside [0, 100] at the extremes
        p.success_count = 10;
        p.fail_count = 0;
        assert_eq!(p.computed_health_score(), 100.0);
        p.success_count = 0;
        p.fail_count = 10;
        assert_eq!(p.computed_health_score(), 0.0);
    }

    #[test]
    fn test_health_score_monotonicity() {
        let mut p = ProxyRecord::new("1.2.3.4", 8080, "test");

        // A pure success stream never decreases the score
        let mut prev = p.computed_health_score();
        for _ in 0..5 {
            p.success_count += 1;
            p.total_checks += 1;
            let score = p.computed_health_score();
            assert!(score >= prev);
            prev = score;
        }

        // A pure failure stream never increases it
        for _ in 0..5 {
            p.fail_count += 1;
            p.total_checks += 1;
            let score = p.computed_health_score();
            assert!(score <= prev);
            prev = score;
        }
    }

    #[test]
    fn test_paginated_response_total_pages() {
        let resp = PaginatedResponse::new(vec![1, 2, 3], 0, 1, 10);
        assert_eq!(resp.total_pages, 0);

        let resp = PaginatedResponse::new(vec![1], 1, 1, 10);
        assert_eq!(resp.total_pages, 1);

        let resp = PaginatedResponse::new(vec![1; 10], 11, 1, 10);
        assert_eq!(resp.total_pages, 2);
    }
}
