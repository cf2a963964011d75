//! kube-rs backed sources.

use std::collections::HashMap;

use ::kube::Client;
use k8s_openapi::api::apps::v1::StatefulSet;
use keel_core::dataselect::{select, DataSelectQuery};
use keel_core::{EventList, PodInfo, PodList, PodMetrics, PodSummary};
use tracing::warn;

use crate::{EventSource, MetricsSource, PodSource, RecordSource, SourceError};

/// Record, pod and event lookups against one cluster.
#[derive(Clone)]
pub struct KubeSources {
    client: Client,
}

impl KubeSources {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> anyhow::Result<Self> {
        Ok(Self::new(keel_kubehub::make_client().await?))
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }
}

#[async_trait::async_trait]
impl RecordSource for KubeSources {
    async fn get_record(&self, namespace: &str, name: &str) -> Result<StatefulSet, SourceError> {
        keel_kubehub::get_statefulset(&self.client, namespace, name).await.map_err(SourceError::from_kube)
    }
}

#[async_trait::async_trait]
impl PodSource for KubeSources {
    async fn get_pod_list(
        &self,
        metrics: &dyn MetricsSource,
        selection: &DataSelectQuery,
        name: &str,
        namespace: &str,
    ) -> Result<PodList, SourceError> {
        let pods = keel_kubehub::get_statefulset_pods(&self.client, namespace, name).await.map_err(SourceError::from_kube)?;
        Ok(select_pod_list(pods, metrics, selection, namespace).await)
    }

    async fn get_pod_info(&self, record: &StatefulSet) -> Result<PodInfo, SourceError> {
        keel_kubehub::get_statefulset_pod_info(&self.client, record).await.map_err(SourceError::from_kube)
    }
}

#[async_trait::async_trait]
impl EventSource for KubeSources {
    async fn get_event_list(&self, selection: &DataSelectQuery, namespace: &str, name: &str) -> Result<EventList, SourceError> {
        let events = keel_kubehub::get_resource_events(&self.client, namespace, name).await.map_err(SourceError::from_kube)?;
        Ok(EventList::from_selected(select(events, selection)))
    }
}

/// Pod usage from the metrics.k8s.io API.
#[derive(Clone)]
pub struct MetricsServer {
    client: Client,
}

impl MetricsServer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl MetricsSource for MetricsServer {
    async fn pod_metrics(&self, namespace: &str, pod_names: &[String]) -> Result<HashMap<String, PodMetrics>, SourceError> {
        keel_kubehub::fetch_pod_metrics(&self.client, namespace, pod_names).await.map_err(SourceError::from_kube)
    }
}

/// Apply `selection` to `pods` and attach metrics for the selected page when requested.
/// A failing metrics source leaves the pods without metrics rather than failing the list.
pub async fn select_pod_list(
    pods: Vec<PodSummary>,
    metrics: &dyn MetricsSource,
    selection: &DataSelectQuery,
    namespace: &str,
) -> PodList {
    let selected = select(pods, selection);
    if !selection.wants_metrics() {
        return PodList::from_selected(selected, None);
    }
    let names: Vec<String> = selected.items.iter().map(|p| p.object_meta.name.clone()).collect();
    match metrics.pod_metrics(namespace, &names).await {
        Ok(by_name) => PodList::from_selected(selected, Some(&by_name)),
        Err(e) => {
            warn!(ns = %namespace, error = %e, "api: pod metrics unavailable; listing without");
            PodList::from_selected(selected, None)
        }
    }
}
