//! Prometheus metrics for Strata.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `strata_dispatch_total` | Counter | - | Exchanges entering a handler stack |
//! | `strata_handler_failures_total` | Counter | `kind` | Handlers that returned an error or panicked |
//! | `strata_terminal_responses_total` | Counter | `status` | Responses written by the terminal responder |
//! | `strata_requests_total` | Counter | `method`, `status` | Exchanges answered by the server |
//! | `strata_request_duration_seconds` | Histogram | `method` | Exchange latency |
//! | `strata_in_flight_requests` | Gauge | - | Exchanges currently being served |
//!
//! Recording functions are safe to call before [`init_metrics`]; without an
//! installed recorder they do nothing.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const DISPATCH_TOTAL: &str = "strata_dispatch_total";
const HANDLER_FAILURES_TOTAL: &str = "strata_handler_failures_total";
const TERMINAL_RESPONSES_TOTAL: &str = "strata_terminal_responses_total";
const REQUESTS_TOTAL: &str = "strata_requests_total";
const REQUEST_DURATION_SECONDS: &str = "strata_request_duration_seconds";
const IN_FLIGHT_REQUESTS: &str = "strata_in_flight_requests";

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Service name, attached as a global `service` label.
    pub service_name: String,

    /// Histogram buckets for exchange duration.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "strata".to_string(),
            // 1ms .. 10s
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// How a handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The handler returned an error.
    Error,
    /// The handler panicked.
    Panic,
}

impl FailureKind {
    /// Label value for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Panic => "panic",
        }
    }
}

/// Builds a Prometheus exporter from the configuration.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidConfig` if the bucket list is empty.
pub fn build_exporter(config: &MetricsConfig) -> TelemetryResult<PrometheusBuilder> {
    PrometheusBuilder::new()
        .add_global_label("service", config.service_name.clone())
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::InvalidConfig(e.to_string()))
}

/// Installs the global Prometheus recorder.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let handle = build_exporter(config)?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();

    Ok(())
}

/// Returns the global metrics handle if initialized.
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Renders metrics in Prometheus format, or `None` before [`init_metrics`].
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Registers descriptions for all standard metrics.
pub fn register_metric_descriptions() {
    describe_counter!(
        DISPATCH_TOTAL,
        "Total number of exchanges dispatched into a handler stack"
    );
    describe_counter!(
        HANDLER_FAILURES_TOTAL,
        "Total number of handlers that returned an error or panicked"
    );
    describe_counter!(
        TERMINAL_RESPONSES_TOTAL,
        "Total number of responses written by the terminal responder"
    );
    describe_counter!(REQUESTS_TOTAL, "Total number of HTTP exchanges answered");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        "HTTP exchange duration in seconds"
    );
    describe_gauge!(
        IN_FLIGHT_REQUESTS,
        "Number of HTTP exchanges currently being served"
    );
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Records an exchange entering its outermost handler stack.
pub fn record_dispatch() {
    counter!(DISPATCH_TOTAL).increment(1);
}

/// Records a failed handler.
pub fn record_handler_failure(kind: FailureKind) {
    counter!(HANDLER_FAILURES_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Records a response written by the terminal responder.
pub fn record_terminal_response(status: u16) {
    counter!(TERMINAL_RESPONSES_TOTAL, "status" => status.to_string()).increment(1);
}

/// Records an answered exchange.
pub fn record_request(method: &str, status: u16, duration: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(REQUEST_DURATION_SECONDS, "method" => method.to_string())
        .record(duration.as_secs_f64());
}

/// Increments the in-flight gauge.
pub fn increment_in_flight() {
    gauge!(IN_FLIGHT_REQUESTS).increment(1.0);
}

/// Decrements the in-flight gauge.
pub fn decrement_in_flight() {
    gauge!(IN_FLIGHT_REQUESTS).decrement(1.0);
}

/// Decrements the in-flight gauge when dropped.
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a guard and increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        increment_in_flight();
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        decrement_in_flight();
    }
}
