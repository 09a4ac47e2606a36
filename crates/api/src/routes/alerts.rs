//! Alert Routes

use alerting::{AlertObligation, DeliveryFailure};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;

/// Query parameters for alerts endpoint
#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    /// Filter by node
    pub node_id: Option<String>,
    /// Maximum number of delivery failures
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Response for alerts endpoint
#[derive(Debug, Serialize)]
pub struct AlertResponse {
    pub active: Vec<AlertObligation>,
    pub count: usize,
    /// Most recent first
    pub delivery_failures: Vec<DeliveryFailure>,
}

/// Active obligations and undelivered alert events
pub async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertQuery>,
) -> Json<AlertResponse> {
    let wanted = |node: &str| params.node_id.as_deref().map_or(true, |n| n == node);

    let active: Vec<_> = state
        .engine
        .active_alerts()
        .await
        .into_iter()
        .filter(|a| wanted(a.node_id.as_str()))
        .collect();

    let delivery_failures = state
        .engine
        .delivery_failures()
        .into_iter()
        .rev()
        .filter(|f| wanted(f.alert.node_id.as_str()))
        .take(params.limit)
        .collect();

    Json(AlertResponse {
        count: active.len(),
        active,
        delivery_failures,
    })
}
