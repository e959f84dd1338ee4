// Prometheus metrics definitions for the CWL status service.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Counters ─────────────────────────────────────────────────────

    /// Snapshot requests, by surface (page, api) and outcome.
    pub static ref SNAPSHOT_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cwl_snapshot_requests_total", "Total war snapshot requests"),
        &["surface", "outcome"],
    )
    .unwrap();

    /// Upstream API requests, by endpoint and HTTP status.
    pub static ref UPSTREAM_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cwl_upstream_requests_total", "Total upstream API requests"),
        &["endpoint", "status"],
    )
    .unwrap();

    /// Upstream sessions that failed to close cleanly.
    pub static ref UPSTREAM_CLOSE_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "cwl_upstream_close_failures_total",
        "Upstream sessions that failed to close",
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Upstream request duration in seconds, by endpoint.
    pub static ref UPSTREAM_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "cwl_upstream_request_duration_seconds",
            "Upstream request duration in seconds",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(SNAPSHOT_REQUESTS_TOTAL.clone()),
        Box::new(UPSTREAM_REQUESTS_TOTAL.clone()),
        Box::new(UPSTREAM_CLOSE_FAILURES_TOTAL.clone()),
        Box::new(UPSTREAM_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            tracing::warn!("Failed to register metric: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_metrics_returns_string() {
        register_metrics();
        SNAPSHOT_REQUESTS_TOTAL
            .with_label_values(&["page", "empty"])
            .inc();
        let output = gather_metrics();
        assert!(output.contains("cwl_snapshot_requests_total"));
    }

    #[test]
    fn test_register_twice_does_not_panic() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_metric_increments() {
        let before = UPSTREAM_CLOSE_FAILURES_TOTAL.get();
        UPSTREAM_CLOSE_FAILURES_TOTAL.inc();
        assert!(UPSTREAM_CLOSE_FAILURES_TOTAL.get() > before);

        let requests = UPSTREAM_REQUESTS_TOTAL.with_label_values(&["metrics-test", "200"]);
        let before = requests.get();
        requests.inc();
        assert_eq!(requests.get(), before + 1);

        let duration = UPSTREAM_REQUEST_DURATION_SECONDS.with_label_values(&["metrics-test"]);
        let before = duration.get_sample_count();
        duration.observe(0.2);
        assert_eq!(duration.get_sample_count(), before + 1);
        assert!(duration.get_sample_sum() >= 0.2);
    }
}
