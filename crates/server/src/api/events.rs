use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use encodarr_core::events::{EventFilter, EventRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::handlers::ErrorResponse;
use crate::state::AppState;

/// Maximum allowed limit for event queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for event queries
const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for the events endpoint
#[derive(Debug, Deserialize)]
pub struct EventQueryParams {
    /// Filter by item (`series#episode`)
    pub item_id: Option<String>,
    /// Filter by event type
    pub event_type: Option<String>,
    /// Filter events after this timestamp (ISO 8601)
    pub from: Option<DateTime<Utc>>,
    /// Filter events before this timestamp (ISO 8601)
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of events to return (default 100, max 1000)
    pub limit: Option<i64>,
    /// Pagination offset (default 0)
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EventQueryResponse {
    pub events: Vec<EventRecord>,
    /// Total number of matching events
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Query the pipeline event log, newest first
pub async fn query_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventQueryParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut base_filter = EventFilter::new().between(params.from, params.to);
    if let Some(item_id) = params.item_id {
        base_filter = base_filter.for_item(item_id);
    }
    if let Some(event_type) = params.event_type {
        base_filter = base_filter.of_type(event_type);
    }

    let query_filter = base_filter.clone().page(limit, offset);

    let events = match state.event_store().query(&query_filter) {
        Ok(events) => events,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(format!("Failed to query events: {}", e)),
            )
                .into_response();
        }
    };

    let total = match state.event_store().count(&base_filter) {
        Ok(count) => count,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(format!("Failed to count events: {}", e)),
            )
                .into_response();
        }
    };

    Json(EventQueryResponse {
        events,
        total,
        limit,
        offset,
    })
    .into_response()
}
