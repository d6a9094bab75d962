//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): finished requests by outcome
//! - `guard_request_duration_seconds` (histogram): latency by outcome
//! - `guard_admission_active` (gauge): granted tickets
//! - `guard_admission_queued` (gauge): waiting requests
//! - `guard_admission_rejected_total` (counter): backpressure by reason
//! - `guard_scanner_verdicts_total` (counter): by pipeline, scanner, result
//! - `guard_stream_segments_total` (counter): relayed segments by action

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::scanner::ScanVerdict;

/// Install the Prometheus exporter with its own HTTP listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(outcome: &'static str, start: Instant) {
    ::metrics::counter!("guard_requests_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("guard_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_admission_load(active: usize, queued: usize) {
    ::metrics::gauge!("guard_admission_active").set(active as f64);
    ::metrics::gauge!("guard_admission_queued").set(queued as f64);
}

pub fn record_admission_rejected(reason: &'static str) {
    ::metrics::counter!("guard_admission_rejected_total", "reason" => reason).increment(1);
}

pub fn record_scan(pipeline: &'static str, scanner: &str, verdict: &ScanVerdict) {
    let result = match (verdict.passed, verdict.errored, verdict.advisory) {
        (_, true, _) => "error",
        (true, false, _) => "pass",
        (false, false, true) => "advisory_fail",
        (false, false, false) => "fail",
    };
    ::metrics::counter!(
        "guard_scanner_verdicts_total",
        "pipeline" => pipeline,
        "scanner" => scanner.to_string(),
        "result" => result
    )
    .increment(1);
}

pub fn record_segment(action: &'static str) {
    ::metrics::counter!("guard_stream_segments_total", "action" => action).increment(1);
}
