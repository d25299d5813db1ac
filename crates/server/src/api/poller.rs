use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::handlers::ErrorResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetPollerRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct PollerStateResponse {
    pub enabled: bool,
    pub feeds: Vec<String>,
    pub interval_secs: u64,
}

fn not_configured() -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        ErrorResponse::new("Source poller is not configured"),
    )
        .into_response()
}

fn poller_state(state: &AppState, enabled: bool) -> Json<PollerStateResponse> {
    let config = &state.config().poller;
    Json(PollerStateResponse {
        enabled,
        feeds: config.feeds.clone(),
        interval_secs: config.interval_secs,
    })
}

pub async fn get_poller(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.poller() {
        Some(poller) => poller_state(&state, poller.is_enabled()).into_response(),
        None => not_configured(),
    }
}

/// Pause or resume source polling
pub async fn set_poller(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetPollerRequest>,
) -> impl IntoResponse {
    match state.poller() {
        Some(poller) => {
            poller.set_enabled(request.enabled);
            poller_state(&state, poller.is_enabled()).into_response()
        }
        None => not_configured(),
    }
}
