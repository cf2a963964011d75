//! Collaborator traits the orchestrator depends on.

use std::collections::HashMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use keel_core::dataselect::DataSelectQuery;
use keel_core::{EventList, PodInfo, PodList, PodMetrics};

use crate::SourceError;

/// Reads the StatefulSet record.
#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    async fn get_record(&self, namespace: &str, name: &str) -> Result<StatefulSet, SourceError>;
}

/// Pod lookups for a StatefulSet.
#[async_trait::async_trait]
pub trait PodSource: Send + Sync {
    /// Pods owned by `namespace/name` with `selection` applied; metrics come from `metrics`
    /// when the selection asks for them.
    async fn get_pod_list(
        &self,
        metrics: &dyn MetricsSource,
        selection: &DataSelectQuery,
        name: &str,
        namespace: &str,
    ) -> Result<PodList, SourceError>;

    /// Aggregate pod counts for `record`.
    async fn get_pod_info(&self, record: &StatefulSet) -> Result<PodInfo, SourceError>;
}

#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    async fn get_event_list(&self, selection: &DataSelectQuery, namespace: &str, name: &str) -> Result<EventList, SourceError>;
}

/// Per-pod usage keyed by pod name. Opaque to the orchestrator.
#[async_trait::async_trait]
pub trait MetricsSource: Send + Sync {
    async fn pod_metrics(&self, namespace: &str, pod_names: &[String]) -> Result<HashMap<String, PodMetrics>, SourceError>;
}

/// Metrics source that never has samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetrics;

#[async_trait::async_trait]
impl MetricsSource for NoMetrics {
    async fn pod_metrics(&self, _namespace: &str, _pod_names: &[String]) -> Result<HashMap<String, PodMetrics>, SourceError> {
        Ok(HashMap::new())
    }
}

/// Injected collaborator handles.
#[derive(Clone)]
pub struct Sources {
    pub records: Arc<dyn RecordSource>,
    pub pods: Arc<dyn PodSource>,
    pub events: Arc<dyn EventSource>,
}

impl Sources {
    pub fn new(records: Arc<dyn RecordSource>, pods: Arc<dyn PodSource>, events: Arc<dyn EventSource>) -> Self {
        Self { records, pods, events }
    }

    /// Use one backend for all three roles.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: RecordSource + PodSource + EventSource + 'static,
    {
        Self { records: backend.clone(), pods: backend.clone(), events: backend }
    }
}
