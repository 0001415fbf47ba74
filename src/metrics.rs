//! Prometheus metrics for the initialization gate.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `apiinit_requests_total` - Gate decisions (label: decision = pass_through | init | reject | bypass)
//! - `apiinit_initializations_total` - Completed initialization transitions (0 or 1 per process)
//! - `apiinit_settings_ignored_total` - Init parameters that configured nothing (label: target)
//! - `apiinit_callbacks_total` - Post-init callbacks run (label: status = ok | panicked)
//!
//! ## Gauges
//! - `apiinit_gate_open` - 1 once traffic flows freely (initialized or disabled), 0 while waiting
//!
//! Recording functions are no-ops until [`init_metrics`] installs the exporter,
//! so library users that never call it pay nothing.

use std::net::SocketAddr;

use anyhow::Context;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "apiinit_requests_total";
    pub const INITIALIZATIONS_TOTAL: &str = "apiinit_initializations_total";
    pub const SETTINGS_IGNORED_TOTAL: &str = "apiinit_settings_ignored_total";
    pub const CALLBACKS_TOTAL: &str = "apiinit_callbacks_total";
    pub const GATE_OPEN: &str = "apiinit_gate_open";
}

/// Initialize the Prometheus metrics exporter.
///
/// This sets up metric descriptions and starts the Prometheus HTTP listener
/// on `metrics_addr`.
///
/// # Errors
///
/// Fails if the exporter cannot be installed (e.g. a recorder is already set
/// or the listener cannot bind).
pub fn init_metrics(metrics_addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    describe_counter!(
        names::REQUESTS_TOTAL,
        "Requests seen by the initialization gate, by decision"
    );
    describe_counter!(
        names::INITIALIZATIONS_TOTAL,
        "Number of completed initialization transitions"
    );
    describe_counter!(
        names::SETTINGS_IGNORED_TOTAL,
        "Initialization parameters that did not configure anything"
    );
    describe_counter!(
        names::CALLBACKS_TOTAL,
        "Post-initialization callbacks run, by outcome"
    );
    describe_gauge!(
        names::GATE_OPEN,
        "Gate state (1 = open, 0 = waiting for initialization)"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
///
/// This is useful for cases where metrics are optional.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record a gate decision.
pub fn record_decision(decision: &'static str) {
    counter!(names::REQUESTS_TOTAL, "decision" => decision).increment(1);
}

/// Record the initialization transition.
pub fn record_initialized() {
    counter!(names::INITIALIZATIONS_TOTAL).increment(1);
}

/// Record init parameters that were dropped for `target`.
pub fn record_settings_ignored(target: &'static str, count: u64) {
    if count > 0 {
        counter!(names::SETTINGS_IGNORED_TOTAL, "target" => target).increment(count);
    }
}

/// Record the outcome of one post-init callback.
pub fn record_callback(status: &'static str) {
    counter!(names::CALLBACKS_TOTAL, "status" => status).increment(1);
}

/// Update the gate state gauge.
pub fn set_gate_open(open: bool) {
    gauge!(names::GATE_OPEN).set(if open { 1.0 } else { 0.0 });
}
