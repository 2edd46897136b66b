//! Metrics collection and exposition.
//!
//! # Metrics
//! - `subserv_requests_total` (counter): requests by method, status,
//!   subhost
//! - `subserv_request_duration_seconds` (histogram): latency distribution
//!
//! # Design Decisions
//! - Low-overhead updates via the `metrics` macros
//! - The Prometheus exporter binds its own listener, only when enabled

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram, Label};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on its own listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(err) => tracing::error!(error = %err, "Failed to install metrics exporter"),
    }
}

/// Record one dispatched request.
pub fn record_request(method: &str, status: u16, subhost: &str, start: Instant) {
    let labels = vec![
        Label::new("method", method.to_string()),
        Label::new("status", status.to_string()),
        Label::new("subhost", subhost.to_string()),
    ];
    counter!("subserv_requests_total", labels.clone()).increment(1);
    histogram!("subserv_request_duration_seconds", labels).record(start.elapsed().as_secs_f64());
}
