//! Metrics collection and exposition.
//!
//! # Metrics
//! - `trellis_requests_total` (counter): requests by method, status
//! - `trellis_request_duration_seconds` (histogram): end-to-end latency
//! - `trellis_cache_lookups_total` (counter): `result` = hit, miss, not_modified
//! - `trellis_cache_writes_total` (counter): `mode` = queued, immediate; `outcome`
//! - `trellis_logic_runs_total` (counter): `strategy` = plugin, subprocess; `outcome`
//! - `trellis_logic_duration_seconds` (histogram): logic unit latency by strategy
//! - `trellis_route_reloads_total` (counter): route table rebuilds
//! - `trellis_routes` (gauge): page routes in the current table
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; with no exporter
//!   installed every call is a no-op
//! - The Prometheus exporter is opt-in and serves its own listener

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter, serving `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "trellis_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("trellis_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(result: &'static str) {
    ::metrics::counter!("trellis_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_write(mode: &'static str) {
    ::metrics::counter!("trellis_cache_writes_total", "mode" => mode, "outcome" => "enqueued")
        .increment(1);
}

pub fn record_cache_write_outcome(mode: &str, ok: bool) {
    let outcome = if ok { "written" } else { "failed" };
    ::metrics::counter!(
        "trellis_cache_writes_total",
        "mode" => mode.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_logic(strategy: &'static str, outcome: &'static str, elapsed: Duration) {
    ::metrics::counter!(
        "trellis_logic_runs_total",
        "strategy" => strategy,
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!("trellis_logic_duration_seconds", "strategy" => strategy)
        .record(elapsed.as_secs_f64());
}

pub fn record_route_reload(routes: usize) {
    ::metrics::counter!("trellis_route_reloads_total").increment(1);
    ::metrics::gauge!("trellis_routes").set(routes as f64);
}
