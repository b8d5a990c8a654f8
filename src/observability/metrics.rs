//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (RPS, latency, errors, health, reconciliation)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-backend and aggregate metrics
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, backend
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_backend_health` (gauge): 1=healthy, 0=unhealthy, -1=draining
//! - `proxy_health_transitions_total` (counter): transitions by target state
//! - `proxy_forward_retries_total` (counter): retries by failed backend
//! - `proxy_routing_failures_total` (counter): failures by kind
//! - `proxy_replacements_total` (counter): replacement requests issued
//! - `proxy_provisioning_timeouts_total` (counter): grace period expiries

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::state::HealthState;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to start metrics endpoint"),
    }
}

pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "backend" => backend.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_backend_health(backend: &str, state: HealthState) {
    let value = match state {
        HealthState::Healthy => 1.0,
        HealthState::Unhealthy => 0.0,
        HealthState::Draining => -1.0,
    };
    gauge!("proxy_backend_health", "backend" => backend.to_string()).set(value);
}

pub fn record_health_transition(backend: &str, to: HealthState) {
    counter!(
        "proxy_health_transitions_total",
        "backend" => backend.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

pub fn record_retry(failed_backend: &str) {
    counter!("proxy_forward_retries_total", "backend" => failed_backend.to_string()).increment(1);
}

pub fn record_routing_failure(kind: &'static str) {
    counter!("proxy_routing_failures_total", "kind" => kind).increment(1);
}

pub fn record_replacements(count: usize) {
    counter!("proxy_replacements_total").increment(count as u64);
}

pub fn record_provisioning_timeout() {
    counter!("proxy_provisioning_timeouts_total").increment(1);
}
