//! Health and scrape endpoints.
//!
//! - `GET /health`: full [`DataLayerHealth`] report, 503 when unhealthy
//! - `GET /health/live`: process liveness, always 200
//! - `GET /health/ready`: 200 unless the data layer is unhealthy
//! - `GET /metrics`: Prometheus text exposition

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::Arc;

use crate::data_layer::DataLayer;

#[derive(Clone)]
pub struct AppState {
    pub data_layer: Arc<DataLayer>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(data_layer: Arc<DataLayer>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            data_layer,
            metrics,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let health = state.data_layer.health_check().await;
    (health.status.http_status(), Json(health)).into_response()
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "alive" })))
}

async fn readiness_handler(State(state): State<AppState>) -> Response {
    let health = state.data_layer.health_check().await;
    let status = health.status;
    (status.http_status(), Json(json!({ "status": status }))).into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Metrics exporter not installed").into_response(),
    }
}
