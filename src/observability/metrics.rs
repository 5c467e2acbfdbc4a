//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): evaluated requests by decision
//! - `guard_denials_total` (counter): denials by reason code
//! - `guard_audit_events_total` (counter): audit events by level
//! - `guard_lockouts_total` (counter): transitions into the locked state
//! - `guard_sweep_removed_total` (counter): entries dropped by maintenance sweeps

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(decision: &'static str) {
    counter!("guard_requests_total", "decision" => decision).increment(1);
}

pub fn record_denial(code: &'static str) {
    counter!("guard_denials_total", "code" => code).increment(1);
}

pub fn record_audit_event(level: &'static str) {
    counter!("guard_audit_events_total", "level" => level).increment(1);
}

pub fn record_lockout(namespace: &'static str) {
    counter!("guard_lockouts_total", "namespace" => namespace).increment(1);
}

pub fn record_sweep(task: &'static str, removed: usize) {
    counter!("guard_sweep_removed_total", "task" => task).increment(removed as u64);
}
