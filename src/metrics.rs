//! Prometheus metrics.
//!
//! Thin helpers over the `metrics` facade so call sites stay one-liners.
//! The recorder is installed once per process; later callers (tests that
//! build several routers) share the same handle.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder (idempotent) and return its handle.
pub fn init() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            // Another recorder is already installed; keep a detached handle
            Err(_) => PrometheusBuilder::new().build_recorder().handle(),
        })
        .clone()
}

/// Count a served request by endpoint and status code.
pub fn record_request(endpoint: &'static str, status: u16) {
    metrics::counter!(
        "relay_requests_total",
        "endpoint" => endpoint,
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record request duration since `start`.
pub fn record_duration(endpoint: &'static str, start: Instant) {
    metrics::histogram!("relay_request_duration_seconds", "endpoint" => endpoint)
        .record(start.elapsed().as_secs_f64());
}

/// Count a date-based cache lookup.
pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("relay_cache_lookups_total", "result" => result).increment(1);
}

/// Count the outcome of one fallback tier.
pub fn record_tier_outcome(tier: &'static str, outcome: &'static str) {
    metrics::counter!("relay_tier_outcomes_total", "tier" => tier, "outcome" => outcome)
        .increment(1);
}

/// Count cache entries removed by an invalidation.
pub fn record_invalidation(kind: &'static str, removed: usize) {
    metrics::counter!("relay_invalidations_total", "kind" => kind).increment(removed as u64);
}

/// Count a failed upstream CMS call.
pub fn record_upstream_error() {
    metrics::counter!("relay_upstream_errors_total").increment(1);
}
