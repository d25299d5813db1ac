use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use encodarr_core::{Item, ItemKey, ItemStatus, ProcessMode};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::handlers::ErrorResponse;
use crate::state::AppState;

/// Ledger view of one item.
#[derive(Debug, Serialize)]
pub struct ItemStatusResponse {
    pub item_id: String,
    pub status: ItemStatus,
    /// Default required variants.
    pub required: Vec<String>,
    pub missing: Vec<String>,
    pub complete: bool,
    pub in_flight: bool,
}

/// Get the ledger status of an item
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Path((series_id, episode_no)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = ItemKey::new(series_id, episode_no);
    let coordinator = state.coordinator();

    let status = match coordinator.status(&key).await {
        Ok(status) => status,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(format!("Failed to read ledger: {}", e)),
            )
                .into_response();
        }
    };

    let required = state.config().pipeline.variants.clone();
    let missing: Vec<String> = status.missing(&required).into_iter().cloned().collect();
    let in_flight = coordinator.in_flight().contains(&key);

    Json(ItemStatusResponse {
        item_id: key.to_string(),
        complete: missing.is_empty(),
        status,
        required,
        missing,
        in_flight,
    })
    .into_response()
}

/// Request body for a manual trigger.
#[derive(Debug, Deserialize)]
pub struct ProcessItemRequest {
    pub series_id: String,
    pub episode_no: String,
    pub title: String,
    /// Magnet link or `.torrent` URL.
    pub locator: String,
    /// Overrides the configured variant list when non-empty.
    #[serde(default)]
    pub variants: Vec<String>,
    /// Re-encode variants the ledger already has.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct ProcessItemResponse {
    pub item_id: String,
    pub accepted: bool,
}

/// Queue an item for processing
///
/// Returns 202 once the item is handed to the coordinator. The outcome is
/// reported through the event log.
pub async fn process_item(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProcessItemRequest>,
) -> impl IntoResponse {
    if request.series_id.trim().is_empty() || request.episode_no.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("series_id and episode_no are required"),
        )
            .into_response();
    }
    if request.locator.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("locator is required"),
        )
            .into_response();
    }
    let profiles = &state.config().encoder.profiles;
    if let Some(unknown) = request.variants.iter().find(|v| !profiles.contains_key(*v)) {
        return (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new(format!("No encode profile for variant '{}'", unknown)),
        )
            .into_response();
    }
    let mut seen = HashSet::new();
    if let Some(repeated) = request.variants.iter().find(|v| !seen.insert(v.as_str())) {
        return (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new(format!("Variant '{}' is listed more than once", repeated)),
        )
            .into_response();
    }

    let key = ItemKey::new(request.series_id, request.episode_no);
    let coordinator = Arc::clone(state.coordinator());
    if coordinator.in_flight().contains(&key) {
        return (
            StatusCode::CONFLICT,
            ErrorResponse::new(format!("Item {} is already being processed", key)),
        )
            .into_response();
    }

    let item = Item::new(key.clone(), request.title, request.locator)
        .with_variants(request.variants);
    let mode = if request.force {
        ProcessMode::Force
    } else {
        ProcessMode::Normal
    };

    info!(item = %key, force = request.force, "Manual trigger");
    let worker = Arc::clone(&coordinator);
    coordinator.spawn_tracked(async move {
        worker.process(item, mode).await;
    });

    (
        StatusCode::ACCEPTED,
        Json(ProcessItemResponse {
            item_id: key.to_string(),
            accepted: true,
        }),
    )
        .into_response()
}
