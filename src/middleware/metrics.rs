//! Prometheus metrics for the connector.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Counters live in the global default registry and are registered on first
//! use.

use once_cell::sync::Lazy;
use prometheus::{opts, register_counter_vec, CounterVec, Encoder, TextEncoder};

struct Metrics {
    gate_checks_total: CounterVec,
    api_requests_total: CounterVec,
    powerbi_calls_total: CounterVec,
    sync_reports_total: CounterVec,
    sync_runs_total: CounterVec,
}

static METRICS: Lazy<Metrics> = Lazy::new(|| Metrics {
    gate_checks_total: register_counter_vec!(
        opts!("connector_gate_checks_total", "Token gate decisions"),
        &["outcome"]
    )
    .expect("failed to register connector_gate_checks_total"),
    api_requests_total: register_counter_vec!(
        opts!("connector_api_requests_total", "Data API reads by endpoint and status"),
        &["endpoint", "status_code"]
    )
    .expect("failed to register connector_api_requests_total"),
    powerbi_calls_total: register_counter_vec!(
        opts!("connector_powerbi_calls_total", "Power BI REST calls"),
        &["operation", "outcome"]
    )
    .expect("failed to register connector_powerbi_calls_total"),
    sync_reports_total: register_counter_vec!(
        opts!("connector_sync_reports_total", "Reports written by synchronization"),
        &["action"]
    )
    .expect("failed to register connector_sync_reports_total"),
    sync_runs_total: register_counter_vec!(
        opts!("connector_sync_runs_total", "Synchronization passes"),
        &["outcome"]
    )
    .expect("failed to register connector_sync_runs_total"),
});

fn outcome(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "failure"
    }
}

pub fn record_gate(accepted: bool) {
    let label = if accepted { "accepted" } else { "rejected" };
    METRICS.gate_checks_total.with_label_values(&[label]).inc();
}

pub fn record_api_request(endpoint: &str, status_code: u16) {
    METRICS
        .api_requests_total
        .with_label_values(&[endpoint, &status_code.to_string()])
        .inc();
}

pub fn record_remote_call(operation: &str, ok: bool) {
    METRICS
        .powerbi_calls_total
        .with_label_values(&[operation, outcome(ok)])
        .inc();
}

pub fn record_sync(ok: bool, reports_created: u64, reports_updated: u64) {
    METRICS.sync_runs_total.with_label_values(&[outcome(ok)]).inc();
    METRICS
        .sync_reports_total
        .with_label_values(&["created"])
        .inc_by(reports_created as f64);
    METRICS
        .sync_reports_total
        .with_label_values(&["updated"])
        .inc_by(reports_updated as f64);
}

/// Prometheus text exposition of the default registry.
pub fn render() -> String {
    Lazy::force(&METRICS);
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
