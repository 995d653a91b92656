//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): dispatched requests by service, outcome
//! - `gateway_request_duration_seconds` (histogram): end-to-end dispatch latency
//! - `gateway_rate_limited_total` (counter): rejections by limiter scope
//! - `gateway_circuit_transitions_total` (counter): breaker transitions by service, target state
//! - `gateway_backend_latency_ewma_ms` (gauge): current EWMA estimate per node
//! - `gateway_reconcile_events_total` (counter): applied desired-state events by kind
//! - `gateway_routes` (gauge): routes in the table
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`init_metrics`] installs the Prometheus recorder.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished dispatch.
pub fn record_request(service: &str, outcome: &'static str, start: Instant) {
    let service = service.to_string();
    counter!("gateway_requests_total", "service" => service.clone(), "outcome" => outcome)
        .increment(1);
    histogram!("gateway_request_duration_seconds", "service" => service)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(scope: &str) {
    counter!("gateway_rate_limited_total", "scope" => scope.to_string()).increment(1);
}

pub fn record_circuit_transition(service: &str, to: &'static str) {
    counter!("gateway_circuit_transitions_total", "service" => service.to_string(), "to" => to)
        .increment(1);
}

pub fn record_backend_latency(node: &str, ewma_ms: f64) {
    gauge!("gateway_backend_latency_ewma_ms", "node" => node.to_string()).set(ewma_ms);
}

pub fn record_reconcile_event(kind: &'static str) {
    counter!("gateway_reconcile_events_total", "kind" => kind).increment(1);
}

pub fn record_route_count(count: usize) {
    gauge!("gateway_routes").set(count as f64);
}
