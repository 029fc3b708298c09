use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use modreport_core::{Config, QueueStatus, ReportStats};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// Whether a browser shim is attached.
    pub bridge_connected: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        bridge_connected: state.bridge().is_connected().await,
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<Config> {
    Json(state.config().clone())
}

/// GET /api/v1/queue
pub async fn get_queue(State(state): State<Arc<AppState>>) -> Json<QueueStatus> {
    Json(state.queue().status().await)
}

/// GET /api/v1/reports/stats
pub async fn get_report_stats(State(state): State<Arc<AppState>>) -> Json<ReportStats> {
    Json(state.orchestrator().stats().await)
}

/// GET /metrics
///
/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
