//! Watermarked interval batching for container metrics
//!
//! This module provides the windowing core of the service:
//! - Buckets samples into fixed-width interval slots anchored to a watermark
//! - Tolerates samples arriving up to `max_delay` slots late
//! - Derives the per-interval CPU delta from the cumulative counter,
//!   withholding it across counter resets
//! - Evicts completed slots once the window grows past `max_delay`

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::models::{EntityKey, MetricRecord, ResourceKind, SampleBehavior};
use crate::observability::IngestMetrics;
use crate::proto::Sample;

/// One time bucket of aggregated metric state.
pub type Slot = HashMap<EntityKey, MetricRecord>;

/// A completed slot handed back by `insert` once it falls out of the window.
#[derive(Debug)]
pub struct EvictedSlot {
    /// Interval-aligned start timestamp (ms since epoch) the slot covered.
    pub start_ms: i64,
    pub entries: Slot,
}

/// Watermark plus the ordered slots it anchors. Shared mutable state, so
/// both live under one lock.
struct WindowState {
    watermark: i64,
    slots: VecDeque<Slot>,
}

/// Sliding window of interval slots anchored to a watermark.
///
/// Slot 0 always covers `[watermark, watermark + interval)`; slot i covers
/// the i-th interval after it. The window grows lazily toward the newest
/// observed timestamp (capped at `max_ahead` slots) and shrinks only by
/// evicting slot 0.
pub struct IntervalBuffer {
    interval_ms: i64,
    max_delay: usize,
    max_ahead: usize,
    state: Mutex<WindowState>,
    metrics: IngestMetrics,
}

impl IntervalBuffer {
    /// Creates a window whose oldest slot starts at `watermark_ms`,
    /// truncated to the interval grid.
    pub fn new(interval_ms: i64, max_delay: usize, max_ahead: usize, watermark_ms: i64) -> Self {
        let interval_ms = interval_ms.max(1);
        Self {
            interval_ms,
            max_delay,
            max_ahead,
            state: Mutex::new(WindowState {
                watermark: watermark_ms / interval_ms * interval_ms,
                slots: VecDeque::new(),
            }),
            metrics: IngestMetrics::new(),
        }
    }

    fn truncate(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms / self.interval_ms * self.interval_ms
    }

    /// Applies one entity's samples in order and returns every slot that
    /// completed as a result.
    ///
    /// The window lock covers slot lookup, delta computation and the
    /// eviction check; callers must not hold the returned slots' data
    /// behind further locking while writing to storage.
    pub fn insert(
        &self,
        key: &EntityKey,
        kind: ResourceKind,
        samples: &[Sample],
    ) -> Vec<EvictedSlot> {
        let mut state = self.state.lock().expect("window lock poisoned");

        for sample in samples {
            self.apply_sample(&mut state, key, kind, sample);
        }

        self.evict_due(&mut state)
    }

    fn apply_sample(
        &self,
        state: &mut WindowState,
        key: &EntityKey,
        kind: ResourceKind,
        sample: &Sample,
    ) {
        // Below the watermark the slot is already flushed; too late.
        if sample.timestamp < state.watermark {
            self.metrics.inc_samples_dropped("late", 1);
            return;
        }

        let truncated = self.truncate(sample.timestamp);
        let index = ((truncated - state.watermark) / self.interval_ms) as usize;

        if index > self.max_ahead {
            // A timestamp this far ahead of the watermark is either clock
            // skew or garbage; growing the window to reach it would let a
            // single sample allocate without bound.
            self.metrics.inc_samples_dropped("ahead", 1);
            return;
        }

        while state.slots.len() <= index {
            state.slots.push_back(Slot::new());
        }

        // Counter deltas need the predecessor total before this slot's
        // record is touched.
        let previous_total = if kind.behavior() == SampleBehavior::CumulativeCounter && index > 0 {
            state.slots[index - 1]
                .get(key)
                .and_then(|record| record.cpu_usage_total)
        } else {
            None
        };

        let record = state.slots[index].entry(key.clone()).or_default();
        match kind {
            ResourceKind::CpuUsageTotal => {
                record.cpu_usage_total = Some(sample.value);
                // No predecessor (first observation) or a decreasing
                // counter (reset) leaves the derived usage untouched.
                if let Some(previous) = previous_total {
                    if sample.value >= previous {
                        record.cpu_usage = Some(sample.value - previous);
                    }
                }
            }
            ResourceKind::CpuLimit => record.cpu_limit = Some(sample.value),
            ResourceKind::MemoryUsage => record.memory_usage = Some(sample.value),
            ResourceKind::MemoryLimit => record.memory_limit = Some(sample.value),
        }
    }

    /// Pops every slot beyond the late-data allowance, oldest first, and
    /// advances the watermark one interval per pop. Draining everything
    /// that is due keeps a post-gap backlog from waiting on future calls.
    fn evict_due(&self, state: &mut WindowState) -> Vec<EvictedSlot> {
        let mut evicted = Vec::new();

        while state.slots.len() > self.max_delay {
            let Some(entries) = state.slots.pop_front() else {
                break;
            };
            evicted.push(EvictedSlot {
                start_ms: state.watermark,
                entries,
            });
            state.watermark += self.interval_ms;
        }

        evicted
    }

    /// Interval-aligned timestamp of the oldest retained slot.
    pub fn watermark(&self) -> i64 {
        self.state.lock().expect("window lock poisoned").watermark
    }

    /// Number of slots currently held.
    pub fn len(&self) -> usize {
        self.state.lock().expect("window lock poisoned").slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL_MS: i64 = 60_000;

    fn buffer(max_delay: usize, watermark_ms: i64) -> IntervalBuffer {
        IntervalBuffer::new(INTERVAL_MS, max_delay, 240, watermark_ms)
    }

    fn key() -> EntityKey {
        EntityKey {
            environment: "env1".to_string(),
            pod: "pod1".to_string(),
            container: "container1".to_string(),
        }
    }

    fn sample(timestamp: i64, value: f64) -> Sample {
        Sample { value, timestamp }
    }

    fn record_at(buffer: &IntervalBuffer, index: usize, key: &EntityKey) -> MetricRecord {
        let state = buffer.state.lock().unwrap();
        state.slots[index][key].clone()
    }

    #[test]
    fn test_watermark_is_truncated_to_grid() {
        let buffer = buffer(5, 61_234);
        assert_eq!(buffer.watermark(), 60_000);
    }

    #[test]
    fn test_first_counter_observation_has_no_usage() {
        let buffer = buffer(5, 0);

        let evicted = buffer.insert(&key(), ResourceKind::CpuUsageTotal, &[sample(0, 100.0)]);

        assert!(evicted.is_empty());
        let record = record_at(&buffer, 0, &key());
        assert_eq!(record.cpu_usage_total, Some(100.0));
        assert_eq!(record.cpu_usage, None);
    }

    #[test]
    fn test_counter_delta_across_consecutive_slots() {
        let buffer = buffer(5, 0);

        buffer.insert(&key(), ResourceKind::CpuUsageTotal, &[sample(0, 100.0)]);
        buffer.insert(&key(), ResourceKind::CpuUsageTotal, &[sample(60_100, 110.0)]);

        let record = record_at(&buffer, 1, &key());
        assert_eq!(record.cpu_usage_total, Some(110.0));
        assert_eq!(record.cpu_usage, Some(10.0));
    }

    #[test]
    fn test_counter_reset_withholds_usage() {
        let buffer = buffer(5, 0);

        buffer.insert(&key(), ResourceKind::CpuUsageTotal, &[sample(0, 100.0)]);
        buffer.insert(&key(), ResourceKind::CpuUsageTotal, &[sample(60_100, 110.0)]);
        buffer.insert(&key(), ResourceKind::CpuUsageTotal, &[sample(121_100, 10.0)]);

        let record = record_at(&buffer, 2, &key());
        assert_eq!(record.cpu_usage_total, Some(10.0));
        assert_eq!(record.cpu_usage, None);
    }

    #[test]
    fn test_counter_delta_needs_immediate_predecessor() {
        let buffer = buffer(5, 0);

        // Slot 0 and slot 2; slot 1 stays empty, so no delta in slot 2.
        buffer.insert(&key(), ResourceKind::CpuUsageTotal, &[sample(0, 100.0)]);
        buffer.insert(&key(), ResourceKind::CpuUsageTotal, &[sample(120_000, 130.0)]);

        let record = record_at(&buffer, 2, &key());
        assert_eq!(record.cpu_usage_total, Some(130.0));
        assert_eq!(record.cpu_usage, None);
    }

    #[test]
    fn test_gauge_last_write_wins() {
        let buffer = buffer(5, 0);

        buffer.insert(&key(), ResourceKind::MemoryUsage, &[sample(1_000, 200.0)]);
        buffer.insert(&key(), ResourceKind::MemoryUsage, &[sample(59_000, 250.0)]);

        let record = record_at(&buffer, 0, &key());
        assert_eq!(record.memory_usage, Some(250.0));
    }

    #[test]
    fn test_duplicate_insert_is_idempotent() {
        let buffer = buffer(5, 0);
        let samples = [sample(30_000, 512.0)];

        buffer.insert(&key(), ResourceKind::MemoryLimit, &samples);
        let once = record_at(&buffer, 0, &key());

        buffer.insert(&key(), ResourceKind::MemoryLimit, &samples);
        let twice = record_at(&buffer, 0, &key());

        assert_eq!(once, twice);
    }

    #[test]
    fn test_late_sample_is_dropped() {
        let buffer = buffer(5, 120_000);

        let evicted = buffer.insert(&key(), ResourceKind::MemoryUsage, &[sample(60_000, 1.0)]);

        assert!(evicted.is_empty());
        assert_eq!(buffer.watermark(), 120_000);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_eviction_at_window_boundary() {
        let buffer = buffer(5, 0);

        buffer.insert(&key(), ResourceKind::MemoryUsage, &[sample(0, 100.0)]);
        // Index 5 is the sixth distinct slot; the window now exceeds
        // max_delay and slot 0 must go.
        let evicted = buffer.insert(&key(), ResourceKind::MemoryUsage, &[sample(300_000, 600.0)]);

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].start_ms, 0);
        assert_eq!(evicted[0].entries[&key()].memory_usage, Some(100.0));
        assert_eq!(buffer.watermark(), 60_000);
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_eviction_drains_backlog_after_gap() {
        let buffer = buffer(5, 0);

        buffer.insert(&key(), ResourceKind::MemoryUsage, &[sample(0, 100.0)]);
        // Jump 12 intervals ahead: 13 slots, 8 of them due.
        let evicted = buffer.insert(&key(), ResourceKind::MemoryUsage, &[sample(720_000, 200.0)]);

        assert_eq!(evicted.len(), 8);
        assert_eq!(evicted[0].start_ms, 0);
        assert_eq!(evicted[7].start_ms, 7 * INTERVAL_MS);
        assert_eq!(buffer.watermark(), 8 * INTERVAL_MS);
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_sample_beyond_max_ahead_is_dropped() {
        let buffer = IntervalBuffer::new(INTERVAL_MS, 5, 10, 0);

        let evicted = buffer.insert(
            &key(),
            ResourceKind::MemoryUsage,
            &[sample(11 * INTERVAL_MS, 1.0)],
        );

        assert!(evicted.is_empty());
        assert!(buffer.is_empty());
        assert_eq!(buffer.watermark(), 0);
    }

    #[test]
    fn test_multiple_samples_applied_in_order() {
        let buffer = buffer(5, 0);

        buffer.insert(
            &key(),
            ResourceKind::CpuUsageTotal,
            &[sample(0, 100.0), sample(60_000, 120.0), sample(120_000, 150.0)],
        );

        assert_eq!(record_at(&buffer, 1, &key()).cpu_usage, Some(20.0));
        assert_eq!(record_at(&buffer, 2, &key()).cpu_usage, Some(30.0));
    }

    #[test]
    fn test_keys_are_independent() {
        let buffer = buffer(5, 0);
        let other = EntityKey {
            environment: "env1".to_string(),
            pod: "pod2".to_string(),
            container: "container1".to_string(),
        };

        buffer.insert(&key(), ResourceKind::CpuUsageTotal, &[sample(0, 100.0)]);
        buffer.insert(&other, ResourceKind::CpuUsageTotal, &[sample(60_000, 50.0)]);

        // `other` has no predecessor in slot 0; no cross-key delta.
        assert_eq!(record_at(&buffer, 1, &other).cpu_usage, None);
    }
}
