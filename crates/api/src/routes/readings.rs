//! Reading Routes

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use classification_engine::ClassificationSummary;
use reading_validator::Reading;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{ApiError, AppState};

/// Query parameters for the recent readings endpoint
#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    /// Maximum number of readings to return
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Only readings of this node
    pub node_id: Option<String>,
}

fn default_limit() -> usize {
    10
}

/// Response for the recent readings endpoint
#[derive(Debug, Serialize)]
pub struct RecentResponse {
    pub status: &'static str,
    pub count: usize,
    pub data: Vec<Reading>,
}

/// Ingest one reading; undecodable bodies get the same rejected summary
pub async fn post_sensor_data(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<ClassificationSummary>) {
    let summary = state.engine.ingest_body(&body).await;
    let status = if summary.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(summary))
}

/// Most recently stored readings, newest first
pub async fn get_recent_readings(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecentQuery>,
) -> Result<Json<RecentResponse>, ApiError> {
    let limit = params.limit.min(1000);
    let data = state
        .engine
        .recent_readings(params.node_id.as_deref(), limit)
        .await?;

    Ok(Json(RecentResponse {
        status: "ok",
        count: data.len(),
        data,
    }))
}
