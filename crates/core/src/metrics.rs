//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Admission queue (releases, rejections, expiries, wait time)
//! - Report orchestration (outcomes, duration)
//! - Tab lifecycle (load timeouts)
//!
//! The server registers these in its registry alongside HTTP metrics.

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Admission Queue Metrics
// =============================================================================

/// Tickets released total.
pub static QUEUE_RELEASES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "modreport_queue_releases_total",
        "Total admission tickets released",
    )
    .unwrap()
});

/// Enqueue attempts rejected because the queue was full.
pub static QUEUE_REJECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "modreport_queue_rejections_total",
        "Total enqueue attempts rejected by back-pressure",
    )
    .unwrap()
});

/// Tickets that expired before release.
pub static QUEUE_TIMEOUTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "modreport_queue_timeouts_total",
        "Total admission tickets that expired while pending",
    )
    .unwrap()
});

/// Time between enqueue and release in seconds.
pub static QUEUE_WAIT_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "modreport_queue_wait_seconds",
            "Time a ticket waited for release",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]),
    )
    .unwrap()
});

// =============================================================================
// Report Metrics
// =============================================================================

/// Reports by result.
pub static REPORTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("modreport_reports_total", "Total report requests by result"),
        &["result"], // "completed", "rejected", "failed"
    )
    .unwrap()
});

/// Report failures by stage.
pub static REPORT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "modreport_report_failures_total",
            "Total report failures by orchestration stage",
        ),
        &["stage"], // "admission", "tab_open", "tab_load", "page_ack"
    )
    .unwrap()
});

/// End-to-end report duration in seconds (from admission to acknowledgement).
pub static REPORT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "modreport_report_duration_seconds",
            "Duration of report tasks after admission",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 7.5, 10.0, 20.0, 30.0, 60.0]),
        &["result"],
    )
    .unwrap()
});

// =============================================================================
// Tab Lifecycle Metrics
// =============================================================================

/// Tabs that did not finish loading in time.
pub static TAB_LOAD_TIMEOUTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "modreport_tab_load_timeouts_total",
        "Total report tabs that failed to load before the deadline",
    )
    .unwrap()
});

/// All core metrics, for registration in the server's registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Queue
        Box::new(QUEUE_RELEASES.clone()),
        Box::new(QUEUE_REJECTIONS.clone()),
        Box::new(QUEUE_TIMEOUTS.clone()),
        Box::new(QUEUE_WAIT_DURATION.clone()),
        // Reports
        Box::new(REPORTS_TOTAL.clone()),
        Box::new(REPORT_FAILURES.clone()),
        Box::new(REPORT_DURATION.clone()),
        // Tabs
        Box::new(TAB_LOAD_TIMEOUTS.clone()),
    ]
}
