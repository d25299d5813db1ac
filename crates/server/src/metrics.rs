//! Prometheus metrics for observability.
//!
//! Exposes HTTP request metrics plus a few gauges sampled from application
//! state on every scrape. Pipeline, admission and supervisor metrics are
//! owned by `encodarr_core::metrics` and registered here.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "encodarr_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("encodarr_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "encodarr_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Application state (collected dynamically)
// =============================================================================

/// Items currently being processed by the coordinator.
pub static ITEMS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "encodarr_items_in_flight",
        "Number of items currently being processed",
    )
    .unwrap()
});

/// Source poller state (1 = polling, 0 = paused or not configured).
pub static POLLER_ENABLED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "encodarr_poller_enabled",
        "Whether the source poller is polling (1) or paused (0)",
    )
    .unwrap()
});

/// Seconds since the service started.
pub static UPTIME_SECONDS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("encodarr_uptime_seconds", "Seconds since service start").unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // State
    registry
        .register(Box::new(ITEMS_IN_FLIGHT.clone()))
        .unwrap();
    registry.register(Box::new(POLLER_ENABLED.clone())).unwrap();
    registry.register(Box::new(UPTIME_SECONDS.clone())).unwrap();

    // Core metrics (admission, supervisor, pipeline)
    for metric in encodarr_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Refresh gauges that mirror application state.
///
/// Called before every scrape.
pub fn collect_dynamic_metrics(state: &AppState) {
    ITEMS_IN_FLIGHT.set(state.coordinator().in_flight().len() as i64);
    POLLER_ENABLED.set(match state.poller() {
        Some(poller) if poller.is_enabled() => 1,
        _ => 0,
    });
    let uptime = chrono::Utc::now() - state.started_at();
    UPTIME_SECONDS.set(uptime.num_seconds());
}
