//! Observability infrastructure for the ingest service
//!
//! Provides Prometheus self-metrics (ingest volume, drop reasons, flush
//! outcomes, window depth) behind a cheap cloneable handle. Metrics are
//! registered once in a process-wide registry; every handle points at the
//! same instances.

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;

/// Histogram buckets for storage flush latency (in seconds).
const FLUSH_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<IngestMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct IngestMetricsInner {
    samples_received: IntCounter,
    samples_dropped: IntCounterVec,
    rows_written: IntCounter,
    owners_written: IntCounter,
    flush_failures: IntCounter,
    flush_latency_seconds: Histogram,
    window_slots: IntGauge,
}

impl IngestMetricsInner {
    fn new() -> Self {
        Self {
            samples_received: register_int_counter!(
                "metrics_ingest_samples_received_total",
                "Samples carried by accepted write requests"
            )
            .expect("Failed to register samples_received_total"),

            samples_dropped: register_int_counter_vec!(
                "metrics_ingest_samples_dropped_total",
                "Samples dropped before buffering, by reason",
                &["reason"]
            )
            .expect("Failed to register samples_dropped_total"),

            rows_written: register_int_counter!(
                "metrics_ingest_rows_written_total",
                "Metric rows handed to the store from completed slots"
            )
            .expect("Failed to register rows_written_total"),

            owners_written: register_int_counter!(
                "metrics_ingest_owners_written_total",
                "Ownership rows handed to the store"
            )
            .expect("Failed to register owners_written_total"),

            flush_failures: register_int_counter!(
                "metrics_ingest_flush_failures_total",
                "Storage flushes that failed and were discarded"
            )
            .expect("Failed to register flush_failures_total"),

            flush_latency_seconds: register_histogram!(
                "metrics_ingest_flush_latency_seconds",
                "Time spent writing a flush to the store",
                FLUSH_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register flush_latency_seconds"),

            window_slots: register_int_gauge!(
                "metrics_ingest_window_slots",
                "Interval slots currently held in the batching window"
            )
            .expect("Failed to register window_slots"),
        }
    }
}

/// Ingest metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct IngestMetrics {
    _private: (),
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(IngestMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &IngestMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Count samples seen on the write path
    pub fn inc_samples_received(&self, count: usize) {
        self.inner().samples_received.inc_by(count as u64);
    }

    /// Count samples dropped before buffering
    ///
    /// Reasons in use: `late`, `ahead`, `nan`, `unroutable`.
    pub fn inc_samples_dropped(&self, reason: &str, count: usize) {
        self.inner()
            .samples_dropped
            .with_label_values(&[reason])
            .inc_by(count as u64);
    }

    /// Count metric rows written to the store
    pub fn inc_rows_written(&self, count: u64) {
        self.inner().rows_written.inc_by(count);
    }

    /// Count ownership rows written to the store
    pub fn inc_owners_written(&self, count: u64) {
        self.inner().owners_written.inc_by(count);
    }

    /// Count a discarded flush
    pub fn inc_flush_failures(&self) {
        self.inner().flush_failures.inc();
    }

    /// Record the duration of a store flush
    pub fn observe_flush_latency(&self, duration_secs: f64) {
        self.inner().flush_latency_seconds.observe(duration_secs);
    }

    /// Update the window depth gauge
    pub fn set_window_slots(&self, slots: i64) {
        self.inner().window_slots.set(slots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle_is_usable() {
        // The global registry persists across tests in one process, so
        // this only exercises the handle surface.
        let metrics = IngestMetrics::new();

        metrics.inc_samples_received(3);
        metrics.inc_samples_dropped("late", 1);
        metrics.inc_rows_written(2);
        metrics.inc_owners_written(1);
        metrics.inc_flush_failures();
        metrics.observe_flush_latency(0.01);
        metrics.set_window_slots(5);
    }
}
