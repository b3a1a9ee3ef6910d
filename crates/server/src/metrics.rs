// crates/server/src/metrics.rs
//! Application metrics for Prometheus monitoring.
//!
//! The engine records through the `metrics` facade; this module installs the
//! Prometheus recorder and renders it for `GET /api/metrics`.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!(
        "research_jobs_submitted_total",
        "Total number of research jobs accepted"
    );
    describe_counter!(
        "research_jobs_finished_total",
        "Research jobs that reached a terminal status, by status"
    );
    describe_counter!(
        "research_events_dropped_total",
        "Status events discarded because a subscriber queue was full"
    );
    describe_histogram!(
        "research_stage_duration_seconds",
        "Duration of successful pipeline stages in seconds"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_metrics();
        assert!(!init_metrics());
        assert!(render_metrics().is_some());
    }
}
