//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, backend
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `proxy_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `proxy_health_checks_total` (counter): probe results by backend
//! - `proxy_flag_evaluations_total` (counter): chain outcomes by flag
//! - `proxy_events_dropped_total` (counter): events lost to a full observer queue
//!
//! All recorders are no-ops until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram, Label};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    let labels = vec![
        Label::new("method", method.to_string()),
        Label::new("status", status.to_string()),
        Label::new("backend", backend.to_string()),
    ];
    counter!("proxy_requests_total", labels.clone()).increment(1);
    histogram!("proxy_request_duration_seconds", labels).record(start.elapsed().as_secs_f64());
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("proxy_backend_health", "backend" => backend.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_circuit_state(backend: &str, state: CircuitState) {
    gauge!("proxy_circuit_state", "backend" => backend.to_string()).set(state.as_gauge());
}

pub fn record_health_check(backend: &str, result: &'static str) {
    counter!("proxy_health_checks_total", "backend" => backend.to_string(), "result" => result).increment(1);
}

pub fn record_flag_evaluation(flag: &str, outcome: &'static str) {
    counter!("proxy_flag_evaluations_total", "flag" => flag.to_string(), "outcome" => outcome).increment(1);
}

pub fn record_event_dropped(kind: &'static str) {
    counter!("proxy_events_dropped_total", "kind" => kind).increment(1);
}
