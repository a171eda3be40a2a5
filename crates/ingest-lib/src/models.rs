//! Core data models for the ingest service

use chrono::{DateTime, Utc};

/// How a resource metric's samples combine within an interval slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleBehavior {
    /// Monotonic running counter; the persisted value is the delta
    /// between consecutive slots.
    CumulativeCounter,
    /// Point-in-time reading; the last write for a slot wins.
    Gauge,
}

/// The resource metrics tracked per container and interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Raw cumulative CPU counter (seconds of CPU time since start).
    CpuUsageTotal,
    CpuLimit,
    MemoryUsage,
    MemoryLimit,
}

impl ResourceKind {
    pub fn behavior(&self) -> SampleBehavior {
        match self {
            ResourceKind::CpuUsageTotal => SampleBehavior::CumulativeCounter,
            ResourceKind::CpuLimit | ResourceKind::MemoryUsage | ResourceKind::MemoryLimit => {
                SampleBehavior::Gauge
            }
        }
    }
}

/// Identity of one container's series within an interval slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub environment: String,
    pub pod: String,
    pub container: String,
}

/// Aggregated metric state for one entity in one interval slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricRecord {
    /// Last raw value of the cumulative CPU counter, kept only to derive
    /// the next slot's delta. Never persisted.
    pub cpu_usage_total: Option<f64>,
    /// Per-interval CPU usage derived from consecutive counter values.
    pub cpu_usage: Option<f64>,
    pub cpu_limit: Option<f64>,
    pub memory_usage: Option<f64>,
    pub memory_limit: Option<f64>,
}

/// One row of the `container_metrics` table.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub time: DateTime<Utc>,
    pub environment: String,
    pub pod: String,
    pub container: String,
    pub cpu_usage: Option<f64>,
    pub cpu_limit: Option<f64>,
    pub memory_usage: Option<f64>,
    pub memory_limit: Option<f64>,
}

/// One row of the `pod_owners` table.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerRow {
    pub environment: String,
    pub pod: String,
    pub owner: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_cpu_counter_is_cumulative() {
        assert_eq!(
            ResourceKind::CpuUsageTotal.behavior(),
            SampleBehavior::CumulativeCounter
        );
        assert_eq!(ResourceKind::CpuLimit.behavior(), SampleBehavior::Gauge);
        assert_eq!(ResourceKind::MemoryUsage.behavior(), SampleBehavior::Gauge);
        assert_eq!(ResourceKind::MemoryLimit.behavior(), SampleBehavior::Gauge);
    }
}
