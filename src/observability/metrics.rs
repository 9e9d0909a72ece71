//! Metrics collection and exposition.
//!
//! # Metrics
//! - `panel_server_starts_total` (counter): successful spawns
//! - `panel_server_spawn_failures_total` (counter): failed spawns
//! - `panel_server_exits_total` (counter): exits by reason (requested, crashed)
//! - `panel_server_running` (gauge): 1 while a process is live
//! - `panel_stage_duration_seconds` (histogram): boot stage duration by stage, outcome
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the exporter
//! - Prometheus endpoint is opt-in via config

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_server_start() {
    ::metrics::counter!("panel_server_starts_total").increment(1);
    ::metrics::gauge!("panel_server_running").set(1.0);
}

pub fn record_spawn_failure() {
    ::metrics::counter!("panel_server_spawn_failures_total").increment(1);
}

pub fn record_server_exit(reason: &'static str) {
    ::metrics::counter!("panel_server_exits_total", "reason" => reason).increment(1);
    ::metrics::gauge!("panel_server_running").set(0.0);
}

pub fn record_stage(stage: &str, outcome: &'static str, elapsed: Duration) {
    ::metrics::histogram!(
        "panel_stage_duration_seconds",
        "stage" => stage.to_string(),
        "outcome" => outcome
    )
    .record(elapsed.as_secs_f64());
}
