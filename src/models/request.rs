use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One gateway attempt, pushed to the request ring and the live feed
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RequestRecord {
    pub ts: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub target_domain: String,
    /// `ip:port` of the upstream attempted, empty when none was selected
    pub proxy_addr: String,
    pub status: i32,
    pub latency_ms: f64,
    pub blocked: bool,
    /// 1-indexed attempt number within the retry loop
    pub attempt: i32,
    pub strategy: String,
    pub error: Option<String>,
    /// First 20 response headers, as a JSON object
    pub response_headers: serde_json::Value,
}

impl RequestRecord {
    pub fn new(method: impl Into<String>, url: impl Into<String>, target_domain: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            method: method.into(),
            url: url.into(),
            target_domain: target_domain.into(),
            proxy_addr: String::new(),
            status: 0,
            latency_ms: 0.0,
            blocked: false,
            attempt: 1,
            strategy: String::new(),
            error: None,
            response_headers: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}
