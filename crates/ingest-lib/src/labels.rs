//! Label mapping for inbound remote-write series
//!
//! Turns the opaque label set of a timeseries into the normalized record
//! consumed by the buffers, and applies the skip policy for pod-scoped
//! and infrastructure entries. Skipped series are dropped silently; at
//! inbound volume, per-series errors would only be noise.

use crate::models::ResourceKind;
use crate::proto::Label;

/// Metric family resolved from `__name__`, plus the `resource` companion
/// label for the combined limits family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappedMetric {
    Resource(ResourceKind),
    /// `kube_pod_labels` series carrying the pod's owner label.
    Owner,
}

/// Normalized view of one timeseries' labels.
#[derive(Debug, Default, PartialEq)]
pub struct MappedLabels {
    pub name: Option<MappedMetric>,
    pub environment: Option<String>,
    pub pod: Option<String>,
    pub container: Option<String>,
    pub owner: Option<String>,
}

/// Pod name prefixes that identify infrastructure workloads.
const POD_PREFIX_BLACKLIST: &[&str] = &[
    "daemonset-",
    "deployment-",
    "kube-",
    "node-",
    "ebs-",
    "efs-",
];

/// Maps a series' labels to a normalized record, or `None` if the series
/// should be skipped entirely.
pub fn map(labels: &[Label]) -> Option<MappedLabels> {
    let mut result = MappedLabels::default();
    let mut metric_name: Option<&str> = None;
    let mut resource: Option<&str> = None;

    for label in labels {
        match label.name.as_str() {
            "pod" | "container_label_io_kubernetes_pod_name" => {
                result.pod = Some(label.value.clone());
            }
            "container" | "container_label_io_kubernetes_container_name" => {
                result.container = Some(label.value.clone());
            }
            "cluster" | "environment" => {
                result.environment = Some(label.value.clone());
            }
            "label_owner" => {
                result.owner = Some(label.value.clone());
            }
            "__name__" => metric_name = Some(label.value.as_str()),
            "resource" => resource = Some(label.value.as_str()),
            _ => {}
        }
    }

    result.name = match metric_name {
        Some("container_cpu_usage_seconds_total") => {
            Some(MappedMetric::Resource(ResourceKind::CpuUsageTotal))
        }
        Some("container_memory_working_set_bytes") => {
            Some(MappedMetric::Resource(ResourceKind::MemoryUsage))
        }
        Some("kube_pod_labels") => Some(MappedMetric::Owner),
        // The limits family splits on the `resource` companion label.
        Some("kube_pod_container_resource_limits") => match resource {
            Some("cpu") => Some(MappedMetric::Resource(ResourceKind::CpuLimit)),
            Some("memory") => Some(MappedMetric::Resource(ResourceKind::MemoryLimit)),
            _ => None,
        },
        _ => None,
    };

    if skip(&result) {
        return None;
    }

    Some(result)
}

/// True for pod-level cgroup entries and infrastructure pods.
fn skip(labels: &MappedLabels) -> bool {
    if labels.container.as_deref() == Some("POD") {
        return true;
    }

    match labels.pod.as_deref() {
        None | Some("") => true,
        Some(pod) => POD_PREFIX_BLACKLIST
            .iter()
            .any(|prefix| pod.starts_with(prefix)),
    }
}
