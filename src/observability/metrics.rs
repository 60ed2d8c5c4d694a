//! Metrics collection and exposition.
//!
//! # Metrics
//! - `transfer_started_total` (counter)
//! - `transfer_completed_total` (counter)
//! - `transfer_failed_total` (counter): by `phase` the transfer failed in
//! - `transfer_stuck_total` (counter): finality polling exhausted
//! - `chain_submit_total` (counter): by `chain`, `result`
//! - `chain_poll_attempts_total` (counter): by `chain`
//! - `transfer_duration_seconds` (histogram): start to `Complete`

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::chain::types::Chain;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_transfer_started() {
    counter!("transfer_started_total").increment(1);
}

pub fn record_transfer_completed(duration: Duration) {
    counter!("transfer_completed_total").increment(1);
    histogram!("transfer_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_transfer_failed(phase: &'static str) {
    counter!("transfer_failed_total", "phase" => phase).increment(1);
}

pub fn record_transfer_stuck() {
    counter!("transfer_stuck_total").increment(1);
}

pub fn record_submit(chain: Chain, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!("chain_submit_total", "chain" => chain.as_str(), "result" => result).increment(1);
}

pub fn record_poll(chain: Chain) {
    counter!("chain_poll_attempts_total", "chain" => chain.as_str()).increment(1);
}
