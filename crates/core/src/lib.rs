//! Keel core types: identities, display metadata and the lists that make up a detail view.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod dataselect;
pub mod detail;

pub mod prelude {
    pub use super::{
        Event, EventList, ListMeta, ObjectMeta, PodInfo, PodList, PodMetrics, PodSummary, ResourceIdentity,
        ResourceKind, TypeMeta,
    };
    pub use crate::dataselect::{DataCell, DataSelectQuery};
    pub use crate::detail::{assemble, StatefulSetDetail};
}

/// Namespace + name of the resource being described.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceIdentity {
    pub namespace: String,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    StatefulSet,
    Pod,
    Event,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::StatefulSet => "statefulset",
            ResourceKind::Pod => "pod",
            ResourceKind::Event => "event",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeMeta {
    pub kind: ResourceKind,
}

impl TypeMeta {
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind }
    }
}

/// Display subset of Kubernetes object metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: Option<String>,
    pub uid: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl From<&k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta> for ObjectMeta {
    fn from(m: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> Self {
        Self {
            name: m.name.clone().unwrap_or_default(),
            namespace: m.namespace.clone(),
            uid: m.uid.clone(),
            labels: m.labels.clone().unwrap_or_default(),
            annotations: m.annotations.clone().unwrap_or_default(),
            creation_timestamp: m.creation_timestamp.as_ref().map(|t| t.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    /// Items matching the selection before pagination.
    pub total_items: usize,
}

/// Aggregate pod counts for a workload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    /// Pods created by the controller (`status.replicas`).
    pub current: i32,
    /// Pods requested by the spec, if the spec sets it.
    pub desired: Option<i32>,
    pub running: i32,
    pub pending: i32,
    pub failed: i32,
    pub succeeded: i32,
}

impl PodInfo {
    /// Count pod phases; phases other than the four tracked ones are ignored.
    pub fn from_phases<'a>(current: i32, desired: Option<i32>, phases: impl IntoIterator<Item = &'a str>) -> Self {
        let mut info = PodInfo { current, desired, ..Default::default() };
        for phase in phases {
            match phase {
                "Running" => info.running += 1,
                "Pending" => info.pending += 1,
                "Failed" => info.failed += 1,
                "Succeeded" => info.succeeded += 1,
                _ => {}
            }
        }
        info
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodMetrics {
    pub cpu_millicores: u64,
    pub memory_bytes: u64,
}

impl std::ops::Add for PodMetrics {
    type Output = PodMetrics;

    fn add(self, rhs: PodMetrics) -> PodMetrics {
        PodMetrics {
            cpu_millicores: self.cpu_millicores.saturating_add(rhs.cpu_millicores),
            memory_bytes: self.memory_bytes.saturating_add(rhs.memory_bytes),
        }
    }
}

impl std::iter::Sum for PodMetrics {
    fn sum<I: Iterator<Item = PodMetrics>>(iter: I) -> Self {
        iter.fold(PodMetrics::default(), |acc, m| acc + m)
    }
}

/// One row of a pod list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodSummary {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    /// Phase or the most relevant container state reason.
    pub status: String,
    pub restart_count: i32,
    pub node_name: Option<String>,
    pub metrics: Option<PodMetrics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodList {
    pub list_meta: ListMeta,
    /// Sum of the metrics of the returned pods, when metrics were requested.
    pub cumulative_metrics: Option<PodMetrics>,
    pub pods: Vec<PodSummary>,
}

impl PodList {
    /// Build a pod list from a selected page, attaching metrics keyed by pod name.
    pub fn from_selected(
        selected: dataselect::Selected<PodSummary>,
        metrics: Option<&std::collections::HashMap<String, PodMetrics>>,
    ) -> Self {
        let mut pods = selected.items;
        let cumulative_metrics = metrics.map(|by_name| {
            for pod in pods.iter_mut() {
                pod.metrics = by_name.get(&pod.object_meta.name).copied();
            }
            pods.iter().filter_map(|p| p.metrics).sum()
        });
        PodList { list_meta: ListMeta { total_items: selected.total_items }, cumulative_metrics, pods }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub message: String,
    pub source_component: String,
    pub source_host: String,
    /// Field path of the involved object, e.g. `spec.containers{web}`.
    pub sub_object: String,
    pub count: i32,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub reason: String,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventList {
    pub list_meta: ListMeta,
    pub events: Vec<Event>,
}

impl EventList {
    pub fn from_selected(selected: dataselect::Selected<Event>) -> Self {
        EventList { list_meta: ListMeta { total_items: selected.total_items }, events: selected.items }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_info_counts_known_phases() {
        let info = PodInfo::from_phases(3, Some(3), ["Running", "Pending", "Running", "Unknown"]);
        assert_eq!(info.current, 3);
        assert_eq!(info.desired, Some(3));
        assert_eq!(info.running, 2);
        assert_eq!(info.pending, 1);
        assert_eq!(info.failed + info.succeeded, 0);
    }

    #[test]
    fn identity_displays_as_ns_slash_name() {
        assert_eq!(ResourceIdentity::new("ns1", "web").to_string(), "ns1/web");
    }

    #[test]
    fn metrics_sum_saturates() {
        let a = PodMetrics { cpu_millicores: u64::MAX, memory_bytes: 1 };
        let b = PodMetrics { cpu_millicores: 5, memory_bytes: 2 };
        let s: PodMetrics = [a, b].into_iter().sum();
        assert_eq!(s.cpu_millicores, u64::MAX);
        assert_eq!(s.memory_bytes, 3);
    }

    #[test]
    fn kind_label_matches_serialized_name() {
        for kind in [ResourceKind::StatefulSet, ResourceKind::Pod, ResourceKind::Event] {
            let json = serde_json::to_string(&kind).expect("serialize");
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
