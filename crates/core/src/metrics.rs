//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Admission queue (depth, encode stage occupancy, wait time)
//! - Process supervisor (encodes, durations, live subprocesses)
//! - Pipeline (item outcomes, downloads, publishes, dropped events)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Admission Queue
// =============================================================================

/// Tickets waiting for the encode stage.
pub static ADMISSION_QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "encodarr_admission_queue_depth",
        "Number of items waiting for the encode stage",
    )
    .unwrap()
});

/// Items currently holding the encode stage (0 or 1).
pub static ENCODE_STAGE_OCCUPIED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "encodarr_encode_stage_occupied",
        "Number of items inside the encode stage",
    )
    .unwrap()
});

/// Time between enqueue and grant.
pub static ADMISSION_WAIT: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "encodarr_admission_wait_seconds",
            "Time spent waiting for the encode stage",
        )
        .buckets(vec![1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0]),
        &[],
    )
    .unwrap()
});

// =============================================================================
// Process Supervisor
// =============================================================================

/// Encodes by variant and result.
pub static ENCODES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("encodarr_encodes_total", "Total encode invocations"),
        &["variant", "result"], // result: "success", "failed", "cancelled"
    )
    .unwrap()
});

/// Encode wall-clock duration.
pub static ENCODE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "encodarr_encode_duration_seconds",
            "Duration of one encode invocation",
        )
        .buckets(vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 2400.0, 3600.0]),
        &["variant"],
    )
    .unwrap()
});

/// Subprocesses currently tracked by the process registry.
pub static LIVE_SUBPROCESSES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "encodarr_live_subprocesses",
        "Encode subprocesses currently running",
    )
    .unwrap()
});

/// Orphaned subprocesses killed during recovery.
pub static ORPHANS_KILLED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "encodarr_orphans_killed_total",
        "Orphaned encode subprocesses killed at startup",
    )
    .unwrap()
});

// =============================================================================
// Pipeline
// =============================================================================

/// Items processed by outcome.
pub static ITEMS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("encodarr_items_processed_total", "Total items processed"),
        &["outcome"], // "completed", "partially_completed", "skipped", "failed"
    )
    .unwrap()
});

/// Downloads by result.
pub static DOWNLOADS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("encodarr_downloads_total", "Total source downloads"),
        &["result"],
    )
    .unwrap()
});

/// Publishes by variant and result.
pub static PUBLISHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("encodarr_publishes_total", "Total variant publishes"),
        &["variant", "result"],
    )
    .unwrap()
});

/// Items discovered by the source poller.
pub static ITEMS_DISCOVERED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "encodarr_items_discovered_total",
        "Items emitted by the source poller",
    )
    .unwrap()
});

/// Events dropped before reaching the event writer.
pub static EVENTS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "encodarr_events_dropped_total",
        "Pipeline events dropped because the event channel was full or closed",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Admission
        Box::new(ADMISSION_QUEUE_DEPTH.clone()),
        Box::new(ENCODE_STAGE_OCCUPIED.clone()),
        Box::new(ADMISSION_WAIT.clone()),
        // Supervisor
        Box::new(ENCODES_TOTAL.clone()),
        Box::new(ENCODE_DURATION.clone()),
        Box::new(LIVE_SUBPROCESSES.clone()),
        Box::new(ORPHANS_KILLED.clone()),
        // Pipeline
        Box::new(ITEMS_PROCESSED.clone()),
        Box::new(DOWNLOADS_TOTAL.clone()),
        Box::new(PUBLISHES_TOTAL.clone()),
        Box::new(ITEMS_DISCOVERED.clone()),
        Box::new(EVENTS_DROPPED.clone()),
    ]
}
