//! Methane Monitor API Server
//!
//! HTTP ingestion front end for the validation engine.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use classification_engine::{CountersSnapshot, ValidationEngine};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::Arc;
use storage::StorageError;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

mod routes;
pub mod settings;

use settings::{LogFormat, LoggingConfig};

/// Application state shared across handlers
pub struct AppState {
    /// Classification engine
    pub engine: Arc<ValidationEngine>,
    /// Prometheus recorder handle, when one is installed
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(engine: Arc<ValidationEngine>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            engine,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }
}

/// Handler errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Failures while bringing the service up
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Logging setup failed: {0}")]
    Logging(String),
    #[error("Metrics recorder setup failed: {0}")]
    Metrics(#[from] BuildError),
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub storage: StorageHealth,
    pub node_count: usize,
    pub counters: CountersSnapshot,
    pub deliveries: DeliveryHealth,
}

/// Alert delivery totals
#[derive(Debug, Serialize)]
pub struct DeliveryHealth {
    pub delivered: u64,
    pub failed: u64,
}

/// Storage backend status
#[derive(Debug, Serialize)]
pub struct StorageHealth {
    pub backend: &'static str,
    pub degraded: bool,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sensor-data", post(routes::readings::post_sensor_data))
        .route("/recent-readings", get(routes::readings::get_recent_readings))
        .route("/alerts", get(routes::alerts::get_alerts))
        .route("/api/v1/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let degraded = state.engine.storage_degraded();
    let log = state.engine.delivery_log();

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        storage: StorageHealth {
            backend: state.engine.storage_backend(),
            degraded,
        },
        node_count: state.engine.node_count().await,
        counters: state.engine.counters(),
        deliveries: DeliveryHealth {
            delivered: log.delivered(),
            failed: log.failed(),
        },
    })
}

/// Prometheus exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> Result<(), StartupError> {
    let level: Level = config
        .level
        .parse()
        .map_err(|_| StartupError::Logging(format!("unknown log level {:?}", config.level)))?;

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true);

    match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    }
    .map_err(|e| StartupError::Logging(e.to_string()))
}

/// Install the global Prometheus recorder
pub fn install_metrics() -> Result<PrometheusHandle, StartupError> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Serve until ctrl-c, then drain in-flight requests and stop the engine
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<(), StartupError> {
    let engine = Arc::clone(&state.engine);
    let app = create_router(state);

    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use alerting::LogDispatcher;
    use axum::body::Body;
    use axum::http::Request;
    use classification_engine::EngineConfig;
    use reading_validator::MissingValuePolicy;
    use storage::Repository;
    use tower::ServiceExt;

    fn app() -> Router {
        let engine = ValidationEngine::start(
            EngineConfig::new(MissingValuePolicy::Interpolate),
            Arc::new(Repository::new()),
            Arc::new(LogDispatcher::new()),
        )
        .unwrap();
        create_router(Arc::new(AppState::new(Arc::new(engine), None)))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn post(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/sensor-data")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_and_read_back() {
        let app = app();

        let (status, body) = send(
            &app,
            post(serde_json::json!({
                "timestamp": "2025-10-22T20:40:00Z",
                "node_id": "CH4_001",
                "methane_ppm": 6000.0,
                "scenario": "leak"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["anomalies"][0]["kind"], "Outlier");
        assert_eq!(body["alerts_fired"].as_array().map(Vec::len), Some(1));

        let (status, body) = send(&app, get("/alerts")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (status, body) = send(&app, get("/recent-readings?node_id=CH4_001&limit=5")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["timestamp"], "2025-10-22T20:40:00Z");
        assert_eq!(body["data"][0]["scenario"], "leak");
    }

    #[tokio::test]
    async fn test_malformed_reading_is_bad_request() {
        let app = app();

        let (status, body) = send(
            &app,
            post(serde_json::json!({ "node_id": "CH4_001", "value": 0.3 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "rejected");
        assert!(body["reason"].as_str().unwrap().contains("timestamp"));
    }

    #[tokio::test]
    async fn test_invalid_json_body_is_rejected_summary() {
        let app = app();

        let request = Request::builder()
            .method("POST")
            .uri("/sensor-data")
            .body(Body::from("{\"node_id\": \"CH4_001\", \"value\":"))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "rejected");
        assert!(body["reason"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let app = app();

        let (status, body) = send(&app, get("/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["storage"]["backend"], "memory");
        assert_eq!(body["node_count"], 0);
        assert_eq!(body["deliveries"]["failed"], 0);

        let (status, _) = send(&app, get("/metrics")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
