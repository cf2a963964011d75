//! StatefulSet detail orchestration.
//!
//! The record lookup runs first; pods, pod info and events only depend on the record and are
//! joined behind a barrier according to the configured [`Schedule`]. Any failure fails the whole
//! call and no partial view is built.

use std::future::Future;
use std::time::Instant;

use futures::future::try_join3;
use k8s_openapi::api::apps::v1::StatefulSet;
use keel_core::dataselect::DataSelectQuery;
use keel_core::detail::{assemble, StatefulSetDetail};
use keel_core::ResourceIdentity;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{DetailError, DetailResult, FetchStage, MetricsSource, Schedule, SourceError, Sources};

pub struct DetailOrchestrator {
    sources: Sources,
    schedule: Schedule,
}

impl DetailOrchestrator {
    pub fn new(sources: Sources) -> Self {
        Self { sources, schedule: Schedule::default() }
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// Build the detail view for `identity`.
    ///
    /// Returns [`DetailError::Cancelled`] as soon as `cancel` fires; in-flight lookups are dropped.
    pub async fn get_detail(
        &self,
        identity: &ResourceIdentity,
        metrics: &dyn MetricsSource,
        pod_selection: &DataSelectQuery,
        cancel: &CancellationToken,
    ) -> DetailResult<StatefulSetDetail> {
        let t0 = Instant::now();
        info!(ns = %identity.namespace, name = %identity.name, schedule = ?self.schedule, "api: detail start");
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DetailError::Cancelled),
            r = self.run(identity, metrics, pod_selection) => r,
        };
        let took_ms = t0.elapsed().as_millis();
        match &res {
            Ok(d) => info!(
                pods = d.pod_list.pods.len(),
                events = d.event_list.events.len(),
                images = d.container_images.len(),
                took_ms = %took_ms,
                "api: detail ok"
            ),
            Err(e) => warn!(kind = e.kind(), error = %e, took_ms = %took_ms, "api: detail failed"),
        }
        let outcome = match &res {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!("detail_requests_total", 1u64, "outcome" => outcome);
        res
    }

    async fn run(
        &self,
        identity: &ResourceIdentity,
        metrics: &dyn MetricsSource,
        pod_selection: &DataSelectQuery,
    ) -> DetailResult<StatefulSetDetail> {
        let record = match fetch(FetchStage::Record, self.sources.records.get_record(&identity.namespace, &identity.name)).await {
            Ok(r) => r,
            Err(DetailError::Upstream { source: SourceError::NotFound(msg), .. }) => return Err(DetailError::NotFound(msg)),
            Err(e) => return Err(e),
        };

        // Events are scoped by the record as returned, not by the request.
        let (namespace, name) = record_scope(&record, identity);
        let event_selection = DataSelectQuery::default();

        let pods = fetch(
            FetchStage::Pods,
            self.sources.pods.get_pod_list(metrics, pod_selection, &identity.name, &identity.namespace),
        );
        let pod_info = fetch(FetchStage::PodInfo, self.sources.pods.get_pod_info(&record));
        let events = fetch(FetchStage::Events, self.sources.events.get_event_list(&event_selection, &namespace, &name));

        let (pod_list, pod_info, event_list) = match self.schedule {
            Schedule::Sequential => (pods.await?, pod_info.await?, events.await?),
            Schedule::Concurrent => try_join3(pods, pod_info, events).await?,
        };

        Ok(assemble(&record, &event_list, &pod_list, &pod_info))
    }
}

fn record_scope(record: &StatefulSet, identity: &ResourceIdentity) -> (String, String) {
    let namespace = record.metadata.namespace.clone().unwrap_or_else(|| identity.namespace.clone());
    let name = record.metadata.name.clone().unwrap_or_else(|| identity.name.clone());
    (namespace, name)
}

/// Await one lookup, record its latency and tag failures with the stage.
async fn fetch<T>(stage: FetchStage, fut: impl Future<Output = Result<T, SourceError>>) -> DetailResult<T> {
    let t0 = Instant::now();
    let res = fut.await;
    let ms = t0.elapsed().as_secs_f64() * 1000.0;
    metrics::histogram!("detail_fetch_ms", ms, "stage" => stage.as_str());
    match res {
        Ok(v) => {
            debug!(stage = %stage, took_ms = ms, "api: fetch ok");
            Ok(v)
        }
        Err(e) => {
            warn!(stage = %stage, error = %e, took_ms = ms, "api: fetch failed");
            Err(DetailError::Upstream { stage, source: e })
        }
    }
}
