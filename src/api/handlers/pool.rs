//! Pool management endpoints

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;
use crate::error::HazeError;
use crate::models::ProxyListParams;

/// Paginated proxy listing with status/country filters
pub async fn list_pool(
    State(state): State<AppState>,
    Query(params): Query<ProxyListParams>,
) -> Result<impl IntoResponse, HazeError> {
    let page = state.proxies.list(&params).await?;
    Ok(Json(page))
}

/// Remove every dead record
pub async fn flush_dead(State(state): State<AppState>) -> Result<impl IntoResponse, HazeError> {
    let flushed = state.proxies.flush_dead().await?;
    Ok(Json(json!({ "status": "ok", "flushed": flushed })))
}

/// Kick off an immediate maintainer refresh
pub async fn refresh_pool(State(state): State<AppState>) -> impl IntoResponse {
    state.maintainer.trigger_refresh();
    Json(json!({ "status": "refresh_triggered" }))
}
