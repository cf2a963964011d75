//! In-memory doubles for the collaborator traits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::anyhow;
use k8s_openapi::api::apps::v1::StatefulSet;
use keel_core::dataselect::DataSelectQuery;
use keel_core::{EventList, PodInfo, PodList, PodMetrics};

use crate::{EventSource, FetchStage, MetricsSource, PodSource, RecordSource, SourceError};

#[derive(Debug, Default)]
pub struct CallCounts {
    record: AtomicUsize,
    pods: AtomicUsize,
    pod_info: AtomicUsize,
    events: AtomicUsize,
}

impl CallCounts {
    fn slot(&self, stage: FetchStage) -> &AtomicUsize {
        match stage {
            FetchStage::Record => &self.record,
            FetchStage::Pods => &self.pods,
            FetchStage::PodInfo => &self.pod_info,
            FetchStage::Events => &self.events,
        }
    }

    pub fn get(&self, stage: FetchStage) -> usize {
        self.slot(stage).load(Ordering::SeqCst)
    }
}

/// A scope/selection pair seen by a list lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub selection: DataSelectQuery,
    pub namespace: String,
    pub name: String,
}

/// Serves preconfigured values for every lookup. Unset values fail: the record with
/// `NotFound`, everything else with an upstream error.
#[derive(Debug, Default)]
pub struct MockCluster {
    pub record: Option<StatefulSet>,
    pub pod_list: Option<PodList>,
    pub pod_info: Option<PodInfo>,
    pub event_list: Option<EventList>,
    /// Stage that fails even when its value is set.
    pub fail: Option<FetchStage>,
    /// Stage that never completes.
    pub stall: Option<FetchStage>,
    pub calls: CallCounts,
    pub pod_requests: Mutex<Vec<ListRequest>>,
    pub event_requests: Mutex<Vec<ListRequest>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    async fn enter(&self, stage: FetchStage) -> Result<(), SourceError> {
        self.calls.slot(stage).fetch_add(1, Ordering::SeqCst);
        if self.stall == Some(stage) {
            std::future::pending::<()>().await;
        }
        if self.fail == Some(stage) {
            return Err(SourceError::Other(anyhow!("mock: {stage} lookup failed")));
        }
        Ok(())
    }

    fn configured<T: Clone>(value: &Option<T>, what: &str) -> Result<T, SourceError> {
        value.clone().ok_or_else(|| SourceError::Other(anyhow!("mock: no {what} configured")))
    }
}

fn remember(log: &Mutex<Vec<ListRequest>>, selection: &DataSelectQuery, namespace: &str, name: &str) {
    if let Ok(mut v) = log.lock() {
        v.push(ListRequest { selection: selection.clone(), namespace: namespace.to_string(), name: name.to_string() });
    }
}

#[async_trait::async_trait]
impl RecordSource for MockCluster {
    async fn get_record(&self, namespace: &str, name: &str) -> Result<StatefulSet, SourceError> {
        self.enter(FetchStage::Record).await?;
        self.record
            .clone()
            .ok_or_else(|| SourceError::NotFound(format!("statefulsets \"{name}\" not found in {namespace}")))
    }
}

#[async_trait::async_trait]
impl PodSource for MockCluster {
    async fn get_pod_list(
        &self,
        _metrics: &dyn MetricsSource,
        selection: &DataSelectQuery,
        name: &str,
        namespace: &str,
    ) -> Result<PodList, SourceError> {
        remember(&self.pod_requests, selection, namespace, name);
        self.enter(FetchStage::Pods).await?;
        Self::configured(&self.pod_list, "pod list")
    }

    async fn get_pod_info(&self, _record: &StatefulSet) -> Result<PodInfo, SourceError> {
        self.enter(FetchStage::PodInfo).await?;
        Self::configured(&self.pod_info, "pod info")
    }
}

#[async_trait::async_trait]
impl EventSource for MockCluster {
    async fn get_event_list(&self, selection: &DataSelectQuery, namespace: &str, name: &str) -> Result<EventList, SourceError> {
        remember(&self.event_requests, selection, namespace, name);
        self.enter(FetchStage::Events).await?;
        Self::configured(&self.event_list, "event list")
    }
}

/// Fixed per-pod metrics; records which pods were asked for.
#[derive(Debug, Default)]
pub struct StaticMetrics {
    by_name: HashMap<String, PodMetrics>,
    fail: bool,
    requested: Mutex<Vec<String>>,
}

impl StaticMetrics {
    pub fn new<'a>(samples: impl IntoIterator<Item = (&'a str, PodMetrics)>) -> Self {
        Self { by_name: samples.into_iter().map(|(k, v)| (k.to_string(), v)).collect(), ..Default::default() }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl MetricsSource for StaticMetrics {
    async fn pod_metrics(&self, _namespace: &str, pod_names: &[String]) -> Result<HashMap<String, PodMetrics>, SourceError> {
        if let Ok(mut v) = self.requested.lock() {
            v.extend(pod_names.iter().cloned());
        }
        if self.fail {
            return Err(SourceError::Other(anyhow!("mock: metrics unavailable")));
        }
        Ok(pod_names.iter().filter_map(|n| self.by_name.get(n).map(|m| (n.clone(), *m))).collect())
    }
}
