use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

/// The five rotation strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    PerRequest,
    PerSession,
    TimeBased,
    OnBlock,
    RoundRobin,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::PerRequest => "per-request",
            Strategy::PerSession => "per-session",
            Strategy::TimeBased => "time-based",
            Strategy::OnBlock => "on-block",
            Strategy::RoundRobin => "round-robin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "per-request" | "per_request" => Some(Strategy::PerRequest),
            "per-session" | "per_session" => Some(Strategy::PerSession),
            "time-based" | "time_based" => Some(Strategy::TimeBased),
            "on-block" | "on_block" => Some(Strategy::OnBlock),
            "round-robin" | "round_robin" => Some(Strategy::RoundRobin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Singleton rotation configuration, persisted as a settings row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    pub strategy: Strategy,
    pub session_ttl_seconds: u64,
    pub rotation_interval_seconds: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::PerRequest,
            session_ttl_seconds: 300,
            rotation_interval_seconds: 30,
        }
    }
}

/// Per-domain strategy override (exact lowercased match)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DomainOverride {
    pub domain: String,
    pub strategy: String, // Stored as string in DB
    pub country: Option<String>,
}

impl DomainOverride {
    pub fn strategy_enum(&self) -> Option<Strategy> {
        Strategy::from_str(&self.strategy)
    }
}

/// Point-in-time view of the rotation config plus overrides, published on a
/// watch channel so selection never re-reads the store per request.
#[derive(Debug, Clone, Default)]
pub struct RotationSnapshot {
    pub config: RotationConfig,
    pub overrides: HashMap<String, DomainOverride>,
}

/// REST payload for updating the rotation config
#[derive(Debug, Clone, Deserialize)]
pub struct RotationRulesUpdate {
    pub strategy: String,
    pub session_ttl_seconds: Option<u64>,
    pub rotation_interval_seconds: Option<u64>,
}

/// REST payload for creating a domain override
#[derive(Debug, Clone, Deserialize)]
pub struct DomainOverrideRequest {
    pub domain: String,
    pub strategy: String,
    pub country: Option<String>,
}
