//! Prometheus metrics for the settlement engine.
//!
//! All metrics follow the naming convention: `settlement_<component>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, Gauge, Histogram, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // HEADER TIMELINE
    // =========================================================================

    /// Validator-set headers committed (genesis included)
    pub static ref HEADERS_COMMITTED: IntCounter = IntCounter::new(
        "settlement_headers_committed_total",
        "Total number of validator-set headers committed"
    ).expect("metric creation failed");

    /// Header commits rejected, by reason
    pub static ref COMMITS_REJECTED: CounterVec = CounterVec::new(
        Opts::new("settlement_commits_rejected_total", "Rejected header commits"),
        &["reason"]
    ).expect("metric creation failed");

    /// Last committed epoch
    pub static ref LAST_COMMITTED_EPOCH: Gauge = Gauge::new(
        "settlement_last_committed_epoch",
        "Epoch of the most recently committed validator-set header"
    ).expect("metric creation failed");

    // =========================================================================
    // QUORUM VERIFICATION
    // =========================================================================

    /// Quorum verifications, by result (accepted/rejected) and mode (live/historical)
    pub static ref QUORUM_VERIFICATIONS: CounterVec = CounterVec::new(
        Opts::new("settlement_quorum_verifications_total", "Quorum signature verifications"),
        &["result", "mode"]
    ).expect("metric creation failed");

    /// Signers excluded from a proof (bad signature, unknown operator, missing key)
    pub static ref SIGNERS_EXCLUDED: IntCounter = IntCounter::new(
        "settlement_quorum_signers_excluded_total",
        "Signers excluded during quorum verification"
    ).expect("metric creation failed");

    /// Quorum verification duration
    pub static ref QUORUM_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "settlement_quorum_verification_duration_seconds",
            "Time spent verifying quorum proofs"
        ).buckets(exponential_buckets(0.00005, 2.0, 15).unwrap())
    ).expect("metric creation failed");

    // =========================================================================
    // SYNC LOOP
    // =========================================================================

    /// Sync state (0=Uninitialized, 1=GenesisSet, 2=Synced, 3=Stale)
    pub static ref SYNC_STATE: Gauge = Gauge::new(
        "settlement_sync_state",
        "Current sync state of the engine"
    ).expect("metric creation failed");

    /// Chain fetch retries after transient failures
    pub static ref FETCH_RETRIES: IntCounter = IntCounter::new(
        "settlement_fetch_retries_total",
        "Chain fetches retried after a transient failure"
    ).expect("metric creation failed");

    /// Reorgs past finality detected
    pub static ref REORGS_DETECTED: IntCounter = IntCounter::new(
        "settlement_reorgs_detected_total",
        "Committed headers found changed on chain"
    ).expect("metric creation failed");

    /// Chain events applied to the registry checkpoints, by event type
    pub static ref EVENTS_APPLIED: CounterVec = CounterVec::new(
        Opts::new("settlement_events_applied_total", "Chain events applied"),
        &["event"]
    ).expect("metric creation failed");
}

/// Handle for the registered metrics
pub struct MetricsHandle {
    registry: Arc<Registry>,
}

impl MetricsHandle {
    /// Registry holding every settlement metric.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HEADERS_COMMITTED.clone()),
        Box::new(COMMITS_REJECTED.clone()),
        Box::new(LAST_COMMITTED_EPOCH.clone()),
        Box::new(QUORUM_VERIFICATIONS.clone()),
        Box::new(SIGNERS_EXCLUDED.clone()),
        Box::new(QUORUM_DURATION.clone()),
        Box::new(SYNC_STATE.clone()),
        Box::new(FETCH_RETRIES.clone()),
        Box::new(REORGS_DETECTED.clone()),
        Box::new(EVENTS_APPLIED.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // May fail if already registered by another test, which is fine
        let _ = register_metrics();
    }

    #[test]
    fn test_counter_increment() {
        HEADERS_COMMITTED.inc();
        assert!(HEADERS_COMMITTED.get() >= 1);
    }

    #[test]
    fn test_labelled_counter() {
        COMMITS_REJECTED.with_label_values(&["invalid_epoch"]).inc();
        assert!(COMMITS_REJECTED.with_label_values(&["invalid_epoch"]).get() >= 1.0);
    }

    #[test]
    fn test_histogram_timer() {
        let _timer = HistogramTimer::new(&QUORUM_DURATION);
    }
}
