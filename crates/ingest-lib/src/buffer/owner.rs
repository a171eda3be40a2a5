//! Time-flushed accumulator for pod ownership metadata
//!
//! Ownership changes rarely and arrives at a fraction of the metric
//! volume, so it gets its own buffer with wall-clock flushing, decoupled
//! from the interval window. Entries are not deduplicated here; the
//! store's insert-if-absent takes care of that.

use dashmap::DashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::models::OwnerRow;

/// Accumulates `(environment, pod) -> owner` entries between flushes.
pub struct OwnerBuffer {
    entries: DashMap<(String, String), String>,
    last_flush: Mutex<SystemTime>,
    flush_interval: Duration,
}

impl OwnerBuffer {
    pub fn new(flush_interval: Duration, last_flush: SystemTime) -> Self {
        Self {
            entries: DashMap::new(),
            last_flush: Mutex::new(last_flush),
            flush_interval,
        }
    }

    /// Records the owner for a pod; a later write for the same pod wins.
    pub fn insert(&self, environment: &str, pod: &str, owner: &str) {
        self.entries.insert(
            (environment.to_string(), pod.to_string()),
            owner.to_string(),
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drains the buffer if the flush interval has elapsed since the last
    /// drain; otherwise returns nothing and leaves the entries in place.
    pub fn drain_if_due(&self, now: SystemTime) -> Vec<OwnerRow> {
        {
            let mut last_flush = self.last_flush.lock().expect("owner flush lock poisoned");
            let elapsed = now.duration_since(*last_flush).unwrap_or_default();
            if elapsed < self.flush_interval {
                return Vec::new();
            }
            *last_flush = now;
        }

        let mut rows = Vec::with_capacity(self.entries.len());
        self.entries.retain(|(environment, pod), owner| {
            rows.push(OwnerRow {
                environment: environment.clone(),
                pod: pod.clone(),
                owner: owner.clone(),
            });
            false
        });
        rows
    }
}
