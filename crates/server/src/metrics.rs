//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the modreport server:
//! - HTTP request metrics (latency, counts)
//! - Browser bridge connection and frame metrics
//! - Queue and report status (collected dynamically)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

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
            "modreport_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("modreport_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "modreport_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Bridge Metrics
// =============================================================================

/// Attached browser shim connections.
pub static BRIDGE_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "modreport_bridge_connections_active",
        "Number of open browser bridge sockets",
    )
    .unwrap()
});

/// Total bridge connections (cumulative).
pub static BRIDGE_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "modreport_bridge_connections_total",
        "Total browser bridge connections since startup",
    )
    .unwrap()
});

/// Bridge frames by direction and type.
pub static BRIDGE_FRAMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("modreport_bridge_frames_total", "Browser bridge frames"),
        &["direction", "type"], // direction: "in" | "out"
    )
    .unwrap()
});

/// Inbound frames that could not be parsed.
pub static BRIDGE_INVALID_FRAMES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "modreport_bridge_invalid_frames_total",
        "Browser bridge frames that failed to parse",
    )
    .unwrap()
});

// =============================================================================
// Queue Metrics (collected dynamically)
// =============================================================================

/// Tickets waiting for release.
pub static QUEUE_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("modreport_queue_pending", "Admission tickets waiting for release").unwrap()
});

/// Whether a report currently holds the admission (1) or not (0).
pub static QUEUE_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "modreport_queue_active",
        "Whether a report task currently holds the admission",
    )
    .unwrap()
});

/// Queue release loop state (1 = running, 0 = stopped).
pub static QUEUE_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "modreport_queue_running",
        "Whether the admission release loop is running (1) or stopped (0)",
    )
    .unwrap()
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

    // Bridge
    registry
        .register(Box::new(BRIDGE_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(BRIDGE_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry.register(Box::new(BRIDGE_FRAMES.clone())).unwrap();
    registry
        .register(Box::new(BRIDGE_INVALID_FRAMES.clone()))
        .unwrap();

    // Queue
    registry.register(Box::new(QUEUE_PENDING.clone())).unwrap();
    registry.register(Box::new(QUEUE_ACTIVE.clone())).unwrap();
    registry.register(Box::new(QUEUE_RUNNING.clone())).unwrap();

    // Core metrics (queue, reports, tabs)
    for metric in modreport_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the queue gauges reflect the current snapshot.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.queue().status().await;
    QUEUE_PENDING.set(status.pending as i64);
    QUEUE_ACTIVE.set(if status.active_ticket.is_some() { 1 } else { 0 });
    QUEUE_RUNNING.set(if status.running { 1 } else { 0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_core_and_server_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/api/v1/health", "200"])
            .inc();
        modreport_core::metrics::QUEUE_RELEASES.inc();

        let text = encode_metrics();
        assert!(text.contains("modreport_http_requests_total"));
        assert!(text.contains("modreport_queue_releases_total"));
    }
}
