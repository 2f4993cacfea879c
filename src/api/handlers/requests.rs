//! Request-ring read endpoint

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::api::server::AppState;
use crate::error::HazeError;

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub count: Option<i64>,
}

/// Last N request records, newest first
pub async fn recent_requests(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<impl IntoResponse, HazeError> {
    let count = query.count.unwrap_or(100);
    let records = state.requests.recent(count).await?;
    Ok(Json(json!({ "requests": records })))
}
