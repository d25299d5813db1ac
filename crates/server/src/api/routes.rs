use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{events, handlers, items, middleware::metrics_middleware, poller};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        // Items
        .route("/items", post(items::process_item))
        .route("/items/{series_id}/{episode_no}", get(items::get_item))
        // Event log
        .route("/events", get(events::query_events))
        // Source poller
        .route("/poller", get(poller::get_poller).put(poller::set_poller))
        .route_layer(middleware::from_fn(metrics_middleware));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
