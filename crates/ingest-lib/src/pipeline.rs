//! Persistence pipeline for inbound write requests
//!
//! This module owns the buffer lifecycles and the write path:
//! - Maps each timeseries' labels and routes it to the interval window
//!   or the owner buffer
//! - Creates the interval window lazily, seeding the watermark from the
//!   first sample batch (clamped so a stale backlog is not replayed)
//! - Converts evicted slots into rows, dropping entries without limits
//! - Writes rows through the store in bounded chunks; a storage failure
//!   loses only the flush in flight, never buffer state

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::buffer::{EvictedSlot, IntervalBuffer, OwnerBuffer};
use crate::health::{components, HealthRegistry};
use crate::labels::{self, MappedMetric};
use crate::models::{EntityKey, MetricRow, OwnerRow};
use crate::observability::IngestMetrics;
use crate::proto::{Sample, WriteRequest};
use crate::store::Store;

/// Buffering parameters for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Width of one interval slot.
    pub interval: Duration,
    /// Slots kept beyond the newest to absorb late data.
    pub max_delay: usize,
    /// Hard cap on slots past the watermark a sample may address.
    pub max_ahead: usize,
    /// Wall-clock period between ownership flushes.
    pub owner_flush_interval: Duration,
    /// Oldest backlog the initial watermark may point at.
    pub retention_floor: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_delay: 5,
            max_ahead: 240,
            owner_flush_interval: Duration::from_secs(300),
            retention_floor: Duration::from_secs(3600),
        }
    }
}

/// Outcome of one processed write request.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestSummary {
    /// Samples carried by the request, before any filtering.
    pub samples: usize,
    /// Metric rows written from completed slots.
    pub rows_flushed: usize,
    /// Ownership rows written.
    pub owners_flushed: usize,
}

/// Routes mapped records into the buffers and drives flushes to storage.
pub struct Pipeline {
    cfg: PipelineConfig,
    window: OnceLock<IntervalBuffer>,
    owners: OwnerBuffer,
    store: Arc<dyn Store>,
    health: HealthRegistry,
    metrics: IngestMetrics,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig, store: Arc<dyn Store>, health: HealthRegistry) -> Self {
        let owners = OwnerBuffer::new(cfg.owner_flush_interval, SystemTime::now());
        Self {
            cfg,
            window: OnceLock::new(),
            owners,
            store,
            health,
            metrics: IngestMetrics::new(),
        }
    }

    /// Processes one decoded write request end to end: buffering happens
    /// synchronously under the buffers' own locks; any flushes those
    /// buffers hand back are written afterwards, outside every lock.
    pub async fn process(&self, request: WriteRequest) -> IngestSummary {
        let mut summary = IngestSummary::default();
        let mut evicted: Vec<EvictedSlot> = Vec::new();

        self.init_window_if_needed(&request);

        for series in &request.timeseries {
            summary.samples += series.samples.len();

            let Some(mapped) = labels::map(&series.labels) else {
                continue;
            };
            let (Some(environment), Some(pod), Some(name)) = (
                mapped.environment.as_deref(),
                mapped.pod.as_deref(),
                mapped.name,
            ) else {
                self.metrics
                    .inc_samples_dropped("unroutable", series.samples.len());
                continue;
            };

            match name {
                MappedMetric::Owner => {
                    if let Some(owner) = mapped.owner.as_deref() {
                        self.owners.insert(environment, pod, owner);
                    }
                }
                MappedMetric::Resource(kind) => {
                    let container = match mapped.container.as_deref() {
                        Some(container) if !container.is_empty() => container,
                        _ => {
                            self.metrics
                                .inc_samples_dropped("unroutable", series.samples.len());
                            continue;
                        }
                    };

                    let valid: Vec<Sample> = series
                        .samples
                        .iter()
                        .filter(|sample| !sample.value.is_nan())
                        .cloned()
                        .collect();
                    let nan_count = series.samples.len() - valid.len();
                    if nan_count > 0 {
                        self.metrics.inc_samples_dropped("nan", nan_count);
                    }
                    if valid.is_empty() {
                        continue;
                    }

                    let Some(window) = self.window.get() else {
                        continue;
                    };
                    let key = EntityKey {
                        environment: environment.to_string(),
                        pod: pod.to_string(),
                        container: container.to_string(),
                    };
                    evicted.extend(window.insert(&key, kind, &valid));
                }
            }
        }

        self.metrics.inc_samples_received(summary.samples);
        if let Some(window) = self.window.get() {
            self.metrics.set_window_slots(window.len() as i64);
        }

        if !evicted.is_empty() {
            summary.rows_flushed = self.flush_metrics(evicted).await;
        }

        let owners = self.owners.drain_if_due(SystemTime::now());
        if !owners.is_empty() {
            summary.owners_flushed = self.flush_owners(owners).await;
        }

        summary
    }

    /// Interval-aligned timestamp of the oldest retained slot, once the
    /// window exists.
    pub fn window_watermark(&self) -> Option<i64> {
        self.window.get().map(IntervalBuffer::watermark)
    }

    /// Seeds the window from the first request that carries samples. The
    /// watermark starts at the oldest sample in the batch, but never
    /// further back than the retention floor, so a replayed backlog
    /// cannot pin the window in the past.
    fn init_window_if_needed(&self, request: &WriteRequest) {
        if self.window.get().is_some() {
            return;
        }

        let min_ts = request
            .timeseries
            .iter()
            .flat_map(|series| series.samples.iter())
            .filter(|sample| !sample.value.is_nan())
            .map(|sample| sample.timestamp)
            .min();

        let Some(min_ts) = min_ts else {
            return;
        };

        let floor = Utc::now().timestamp_millis() - self.cfg.retention_floor.as_millis() as i64;
        let watermark = min_ts.max(floor);

        let interval_ms = self.cfg.interval.as_millis() as i64;
        let created = self.window.set(IntervalBuffer::new(
            interval_ms,
            self.cfg.max_delay,
            self.cfg.max_ahead,
            watermark,
        ));
        if created.is_ok() {
            info!(
                watermark,
                interval_ms,
                max_delay = self.cfg.max_delay,
                "Interval window created"
            );
        }
    }

    async fn flush_metrics(&self, evicted: Vec<EvictedSlot>) -> usize {
        let rows = rows_from_slots(evicted);
        if rows.is_empty() {
            return 0;
        }

        let started = Instant::now();
        match self.store.upsert_metrics(&rows).await {
            Ok(written) => {
                self.metrics
                    .observe_flush_latency(started.elapsed().as_secs_f64());
                self.metrics.inc_rows_written(written);
                self.health.set_healthy(components::STORE).await;
                debug!(rows = written, "Metric rows written");
                written as usize
            }
            Err(e) if e.is_transient() => {
                self.metrics.inc_flush_failures();
                warn!(error = %e, rows = rows.len(), "Transient store failure, dropping metric flush");
                self.health
                    .set_degraded(components::STORE, e.to_string())
                    .await;
                0
            }
            Err(e) => {
                self.metrics.inc_flush_failures();
                error!(error = %e, rows = rows.len(), "Store failure, dropping metric flush");
                self.health
                    .set_unhealthy(components::STORE, e.to_string())
                    .await;
                0
            }
        }
    }

    async fn flush_owners(&self, rows: Vec<OwnerRow>) -> usize {
        let started = Instant::now();
        match self.store.insert_owners(&rows).await {
            Ok(written) => {
                self.metrics
                    .observe_flush_latency(started.elapsed().as_secs_f64());
                self.metrics.inc_owners_written(written);
                self.health.set_healthy(components::STORE).await;
                debug!(rows = written, "Owner rows written");
                written as usize
            }
            Err(e) if e.is_transient() => {
                self.metrics.inc_flush_failures();
                warn!(error = %e, rows = rows.len(), "Transient store failure, dropping owner flush");
                self.health
                    .set_degraded(components::STORE, e.to_string())
                    .await;
                0
            }
            Err(e) => {
                self.metrics.inc_flush_failures();
                error!(error = %e, rows = rows.len(), "Store failure, dropping owner flush");
                self.health
                    .set_unhealthy(components::STORE, e.to_string())
                    .await;
                0
            }
        }
    }
}

/// Converts evicted slots to rows. Entries without a container, or with
/// neither limit present, carry utilization that cannot be related to a
/// quota and are not persisted.
fn rows_from_slots(slots: Vec<EvictedSlot>) -> Vec<MetricRow> {
    let mut rows = Vec::new();

    for slot in slots {
        let Some(time) = DateTime::<Utc>::from_timestamp_millis(slot.start_ms) else {
            continue;
        };
        for (key, record) in slot.entries {
            if key.container.is_empty() {
                continue;
            }
            if record.cpu_limit.is_none() && record.memory_limit.is_none() {
                continue;
            }
            rows.push(MetricRow {
                time,
                environment: key.environment,
                pod: key.pod,
                container: key.container,
                cpu_usage: record.cpu_usage,
                cpu_limit: record.cpu_limit,
                memory_usage: record.memory_usage,
                memory_limit: record.memory_limit,
            });
        }
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{Label, TimeSeries};
    use crate::store::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// In-memory store that records what the pipeline hands it.
    #[derive(Default)]
    struct MockStore {
        metrics: Mutex<Vec<MetricRow>>,
        owners: Mutex<Vec<OwnerRow>>,
        fail: AtomicBool,
    }

    impl MockStore {
        fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
        }

        fn metric_rows(&self) -> Vec<MetricRow> {
            self.metrics.lock().unwrap().clone()
        }

        fn owner_rows(&self) -> Vec<OwnerRow> {
            self.owners.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Store for MockStore {
        async fn ensure_schema(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn upsert_metrics(&self, rows: &[MetricRow]) -> Result<u64, StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Transient {
                    source: sqlx::Error::PoolTimedOut,
                });
            }
            self.metrics.lock().unwrap().extend_from_slice(rows);
            Ok(rows.len() as u64)
        }

        async fn insert_owners(&self, rows: &[OwnerRow]) -> Result<u64, StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Transient {
                    source: sqlx::Error::PoolTimedOut,
                });
            }
            self.owners.lock().unwrap().extend_from_slice(rows);
            Ok(rows.len() as u64)
        }
    }

    const INTERVAL_MS: i64 = 60_000;

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            interval: Duration::from_secs(60),
            max_delay: 1,
            max_ahead: 240,
            owner_flush_interval: Duration::ZERO,
            retention_floor: Duration::from_secs(3600),
        }
    }

    fn pipeline_with(cfg: PipelineConfig) -> (Pipeline, Arc<MockStore>) {
        let store = Arc::new(MockStore::default());
        let pipeline = Pipeline::new(cfg, store.clone(), HealthRegistry::new());
        (pipeline, store)
    }

    fn label(name: &str, value: &str) -> Label {
        Label {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn series(metric: &str, pod: &str, container: &str, samples: Vec<Sample>) -> TimeSeries {
        TimeSeries {
            labels: vec![
                label("cluster", "prod"),
                label("pod", pod),
                label("container", container),
                label("__name__", metric),
            ],
            samples,
        }
    }

    fn sample(timestamp: i64, value: f64) -> Sample {
        Sample { value, timestamp }
    }

    /// Recent interval-aligned base timestamp, safely past the retention
    /// floor clamp.
    fn base_ts() -> i64 {
        (Utc::now().timestamp_millis() - 600_000) / INTERVAL_MS * INTERVAL_MS
    }

    #[tokio::test]
    async fn test_evicted_slot_is_written_as_rows() {
        let (pipeline, store) = pipeline_with(test_config());
        let base = base_ts();

        let first = WriteRequest {
            timeseries: vec![
                series(
                    "container_memory_working_set_bytes",
                    "pod-1",
                    "app",
                    vec![sample(base, 1024.0)],
                ),
                series(
                    "kube_pod_container_resource_limits",
                    "pod-1",
                    "app",
                    vec![sample(base, 2048.0)],
                )
                .with_resource("memory"),
            ],
        };
        let summary = pipeline.process(first).await;
        assert_eq!(summary.samples, 2);
        assert_eq!(summary.rows_flushed, 0);

        // Three intervals later: the window exceeds max_delay and the
        // first slot flushes.
        let second = WriteRequest {
            timeseries: vec![series(
                "container_memory_working_set_bytes",
                "pod-1",
                "app",
                vec![sample(base + 3 * INTERVAL_MS, 900.0)],
            )],
        };
        let summary = pipeline.process(second).await;

        assert_eq!(summary.rows_flushed, 1);
        let rows = store.metric_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].environment, "prod");
        assert_eq!(rows[0].pod, "pod-1");
        assert_eq!(rows[0].container, "app");
        assert_eq!(rows[0].memory_usage, Some(1024.0));
        assert_eq!(rows[0].memory_limit, Some(2048.0));
        assert_eq!(rows[0].time.timestamp_millis(), base);
    }

    #[tokio::test]
    async fn test_entries_without_limits_are_not_persisted() {
        let (pipeline, store) = pipeline_with(test_config());
        let base = base_ts();

        pipeline
            .process(WriteRequest {
                timeseries: vec![series(
                    "container_memory_working_set_bytes",
                    "pod-1",
                    "app",
                    vec![sample(base, 1024.0)],
                )],
            })
            .await;
        let summary = pipeline
            .process(WriteRequest {
                timeseries: vec![series(
                    "container_memory_working_set_bytes",
                    "pod-1",
                    "app",
                    vec![sample(base + 3 * INTERVAL_MS, 900.0)],
                )],
            })
            .await;

        assert_eq!(summary.rows_flushed, 0);
        assert!(store.metric_rows().is_empty());
    }

    #[tokio::test]
    async fn test_owner_series_routes_to_owner_table() {
        let (pipeline, store) = pipeline_with(test_config());

        let request = WriteRequest {
            timeseries: vec![TimeSeries {
                labels: vec![
                    label("cluster", "prod"),
                    label("pod", "pod-1"),
                    label("__name__", "kube_pod_labels"),
                    label("label_owner", "team-a"),
                ],
                samples: vec![],
            }],
        };
        let summary = pipeline.process(request).await;

        assert_eq!(summary.owners_flushed, 1);
        let owners = store.owner_rows();
        assert_eq!(owners.len(), 1);
        assert_eq!(
            owners[0],
            OwnerRow {
                environment: "prod".to_string(),
                pod: "pod-1".to_string(),
                owner: "team-a".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_skipped_and_unroutable_series_touch_nothing() {
        let (pipeline, store) = pipeline_with(test_config());
        let base = base_ts();

        let request = WriteRequest {
            timeseries: vec![
                // Blacklisted pod prefix.
                series(
                    "container_memory_working_set_bytes",
                    "daemonset-logger",
                    "app",
                    vec![sample(base, 1.0)],
                ),
                // No metric name resolvable.
                TimeSeries {
                    labels: vec![label("pod", "pod-1"), label("__name__", "unrelated_series")],
                    samples: vec![sample(base, 1.0)],
                },
            ],
        };
        let summary = pipeline.process(request).await;

        assert_eq!(summary.samples, 2);
        assert_eq!(summary.rows_flushed, 0);
        assert!(store.metric_rows().is_empty());
        assert!(store.owner_rows().is_empty());
    }

    #[tokio::test]
    async fn test_nan_samples_are_ignored() {
        let (pipeline, _store) = pipeline_with(test_config());
        let base = base_ts();

        pipeline
            .process(WriteRequest {
                timeseries: vec![series(
                    "container_memory_working_set_bytes",
                    "pod-1",
                    "app",
                    vec![sample(base, f64::NAN)],
                )],
            })
            .await;

        // An all-NaN request must not create the window either.
        assert_eq!(pipeline.window_watermark(), None);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_corrupt_buffers() {
        let (pipeline, store) = pipeline_with(test_config());
        let base = base_ts();

        pipeline
            .process(WriteRequest {
                timeseries: vec![
                    series(
                        "container_memory_working_set_bytes",
                        "pod-1",
                        "app",
                        vec![sample(base, 1024.0)],
                    ),
                    series(
                        "kube_pod_container_resource_limits",
                        "pod-1",
                        "app",
                        vec![sample(base, 2048.0)],
                    )
                    .with_resource("memory"),
                ],
            })
            .await;

        store.set_failing(true);
        let summary = pipeline
            .process(WriteRequest {
                timeseries: vec![
                    series(
                        "container_memory_working_set_bytes",
                        "pod-1",
                        "app",
                        vec![sample(base + 3 * INTERVAL_MS, 900.0)],
                    ),
                    series(
                        "kube_pod_container_resource_limits",
                        "pod-1",
                        "app",
                        vec![sample(base + 3 * INTERVAL_MS, 2048.0)],
                    )
                    .with_resource("memory"),
                ],
            })
            .await;

        // The flush in flight is lost, nothing was written.
        assert_eq!(summary.rows_flushed, 0);
        assert!(store.metric_rows().is_empty());
        // The window kept advancing: three slots evicted, three steps.
        let watermark = pipeline.window_watermark().unwrap();
        assert_eq!(watermark, base + 3 * INTERVAL_MS);

        // Recovery: later slots flush normally.
        store.set_failing(false);
        let summary = pipeline
            .process(WriteRequest {
                timeseries: vec![series(
                    "container_memory_working_set_bytes",
                    "pod-1",
                    "app",
                    vec![sample(base + 6 * INTERVAL_MS, 800.0)],
                )],
            })
            .await;

        assert_eq!(summary.rows_flushed, 1);
        let rows = store.metric_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].memory_limit, Some(2048.0));
    }

    #[tokio::test]
    async fn test_initial_watermark_is_clamped_to_retention_floor() {
        let (pipeline, _store) = pipeline_with(test_config());

        // A sample from the distant past must not pin the window there.
        pipeline
            .process(WriteRequest {
                timeseries: vec![series(
                    "container_memory_working_set_bytes",
                    "pod-1",
                    "app",
                    vec![sample(1_000_000, 1.0)],
                )],
            })
            .await;

        let watermark = pipeline.window_watermark().unwrap();
        let floor = Utc::now().timestamp_millis() - 3_600_000;
        assert!(watermark >= floor - INTERVAL_MS);
    }

    impl TimeSeries {
        /// Appends the `resource` companion label used by the limits family.
        fn with_resource(mut self, resource: &str) -> Self {
            self.labels.push(label("resource", resource));
            self
        }
    }
}
