//! Rotation config and domain-override endpoints
//!
//! Mutations persist to the store, then publish a fresh snapshot on the watch
//! channel so the engine picks the change up without re-reading per request.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::api::server::AppState;
use crate::error::HazeError;
use crate::models::{DomainOverride, DomainOverrideRequest, RotationRulesUpdate, Strategy};

/// Current rotation config
pub async fn get_rules(State(state): State<AppState>) -> Result<impl IntoResponse, HazeError> {
    let config = state.rotation.get_config().await?;
    Ok(Json(config))
}

/// Update strategy and timing parameters
pub async fn update_rules(
    State(state): State<AppState>,
    Json(body): Json<RotationRulesUpdate>,
) -> Result<impl IntoResponse, HazeError> {
    let strategy = Strategy::from_str(&body.strategy)
        .ok_or_else(|| HazeError::UnknownStrategy(body.strategy.clone()))?;

    let mut config = state.rotation.get_config().await?;
    config.strategy = strategy;
    if let Some(ttl) = body.session_ttl_seconds {
        config.session_ttl_seconds = ttl;
    }
    if let Some(interval) = body.rotation_interval_seconds {
        config.rotation_interval_seconds = interval;
    }

    state.rotation.set_config(&config).await?;
    publish_snapshot(&state).await;

    Ok(Json(config))
}

/// All domain overrides
pub async fn list_overrides(State(state): State<AppState>) -> Result<impl IntoResponse, HazeError> {
    let overrides = state.rotation.list_overrides().await?;
    Ok(Json(json!({ "overrides": overrides })))
}

/// Create or replace a domain override
pub async fn add_override(
    State(state): State<AppState>,
    Json(body): Json<DomainOverrideRequest>,
) -> Result<impl IntoResponse, HazeError> {
    if Strategy::from_str(&body.strategy).is_none() {
        return Err(HazeError::UnknownStrategy(body.strategy));
    }
    if body.domain.trim().is_empty() {
        return Err(HazeError::InvalidRequest("domain must not be empty".into()));
    }

    let override_ = DomainOverride {
        domain: body.domain.trim().to_lowercase(),
        strategy: body.strategy,
        country: body.country.filter(|c| !c.is_empty()),
    };

    state.rotation.set_override(&override_).await?;
    publish_snapshot(&state).await;

    Ok(Json(json!({ "status": "added", "domain": override_.domain })))
}

/// Remove a domain override
pub async fn delete_override(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<impl IntoResponse, HazeError> {
    let deleted = state.rotation.delete_override(&domain).await?;
    if !deleted {
        return Err(HazeError::NotFound(format!("no override for {}", domain)));
    }

    publish_snapshot(&state).await;

    Ok(Json(json!({ "status": "deleted", "domain": domain.to_lowercase() })))
}

/// Reload the snapshot and hand it to the engine's watch channel
async fn publish_snapshot(state: &AppState) {
    match state.rotation.load_snapshot().await {
        Ok(snapshot) => {
            let _ = state.snapshot_tx.send(snapshot);
        }
        Err(e) => warn!("Failed to reload rotation snapshot: {}", e),
    }
}
