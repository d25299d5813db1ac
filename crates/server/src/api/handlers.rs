use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use encodarr_core::AdmissionStatus;
use serde::Serialize;
use std::sync::Arc;

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

/// Error body shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Json<Self> {
        Json(Self {
            error: error.into(),
        })
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Snapshot of the running pipeline.
#[derive(Serialize)]
pub struct StatusResponse {
    pub started_at: DateTime<Utc>,
    /// Default required variants, in encode order.
    pub variants: Vec<String>,
    pub admission: AdmissionStatus,
    /// Process ids of live encode subprocesses.
    pub live_pids: Vec<u32>,
    /// Items being processed, as `series#episode`.
    pub in_flight: Vec<String>,
    /// Absent when no poller is configured.
    pub poller_enabled: Option<bool>,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let coordinator = state.coordinator();
    Json(StatusResponse {
        started_at: state.started_at(),
        variants: state.config().pipeline.variants.clone(),
        admission: coordinator.queue().status(),
        live_pids: state.registry().pids(),
        in_flight: coordinator
            .in_flight()
            .iter()
            .map(ToString::to_string)
            .collect(),
        poller_enabled: state.poller().map(|p| p.is_enabled()),
    })
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::new(format!("Failed to encode metrics: {}", e)),
        )
            .into_response(),
    }
}
