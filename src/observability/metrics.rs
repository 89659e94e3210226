//! Metrics collection and exposition.
//!
//! # Metrics
//! - `broker_reload_passes_total` (counter): ticks by outcome
//! - `broker_reload_entities_total` (counter): reconciled entities by action
//! - `broker_reload_pending_conflicts` (gauge): deletes waiting on a reference
//!
//! # Design Decisions
//! - Without an installed recorder every call is a no-op
//! - Prometheus exposition is optional and owns its own listener

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::topology::ReconciliationReport;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_pass(outcome: &'static str) {
    metrics::counter!("broker_reload_passes_total", "outcome" => outcome).increment(1);
}

pub fn record_entities(report: &ReconciliationReport) {
    let counts = [
        ("created", report.created.len()),
        ("updated", report.updated.len()),
        ("deleted", report.deleted.len()),
        ("skipped", report.skipped.len()),
        ("failed", report.errors.iter().filter(|e| !e.is_conflict()).count()),
    ];
    for (action, count) in counts {
        if count > 0 {
            metrics::counter!("broker_reload_entities_total", "action" => action)
                .increment(count as u64);
        }
    }
}

pub fn set_pending_conflicts(count: usize) {
    metrics::gauge!("broker_reload_pending_conflicts").set(count as f64);
}
