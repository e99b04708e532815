//! Metrics collection and exposition.
//!
//! # Metrics
//! - `switchyard_requests_total` (counter): requests by route kind, status
//! - `switchyard_request_duration_seconds` (histogram): time to response head
//! - `switchyard_sse_sessions_active` (gauge): open event streams
//! - `switchyard_sse_cleanup_failures_total` (counter): panicking cleanups
//! - `switchyard_sse_frames_dropped_total` (counter): frames lost to slow clients
//!
//! # Design Decisions
//! - Labels are low-cardinality: route kind and status, never the path
//! - Recording is a no-op until `init_metrics` installs the exporter

use std::net::SocketAddr;
use std::time::Instant;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished dispatch.
pub fn record_request(kind: &'static str, status: u16, start: Instant) {
    counter!(
        "switchyard_requests_total",
        "kind" => kind,
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("switchyard_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

pub fn sse_session_opened() {
    gauge!("switchyard_sse_sessions_active").increment(1.0);
}

pub fn sse_session_closed() {
    gauge!("switchyard_sse_sessions_active").decrement(1.0);
}

pub fn record_cleanup_failure() {
    counter!("switchyard_sse_cleanup_failures_total").increment(1);
}

pub fn record_dropped_frame() {
    counter!("switchyard_sse_frames_dropped_total").increment(1);
}
