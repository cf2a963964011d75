//! Keel kubehub – StatefulSet, pod, event and metrics lookups against the cluster

#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Event as KubeEvent, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client, ResourceExt,
};
use keel_core::{Event, ObjectMeta, PodInfo, PodMetrics, PodSummary, ResourceKind, TypeMeta};
use serde_json::Value;
use tracing::debug;

/// Reason fragments that mark an untyped event as a warning.
const FAILED_REASON_PARTIALS: [&str; 11] =
    ["failed", "err", "exceeded", "invalid", "unhealthy", "mismatch", "insufficient", "conflict", "outof", "nil", "backoff"];

pub async fn make_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from default config")
}

/// True when the error chain carries an API 404.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<kube::Error>())
        .any(|e| matches!(e, kube::Error::Api(ae) if ae.code == 404))
}

pub async fn get_statefulset(client: &Client, namespace: &str, name: &str) -> Result<StatefulSet> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    api.get(name).await.with_context(|| format!("getting statefulset {namespace}/{name}"))
}

/// Render a label selector in the list query syntax.
pub fn selector_query(selector: &LabelSelector) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(labels) = &selector.match_labels {
        parts.extend(labels.iter().map(|(k, v)| format!("{k}={v}")));
    }
    for req in selector.match_expressions.iter().flatten() {
        let values = req.values.as_deref().unwrap_or(&[]).join(",");
        let part = match req.operator.as_str() {
            "In" => format!("{} in ({values})", req.key),
            "NotIn" => format!("{} notin ({values})", req.key),
            "Exists" => req.key.clone(),
            "DoesNotExist" => format!("!{}", req.key),
            other => {
                debug!(key = %req.key, operator = %other, "skipping unknown selector operator");
                continue;
            }
        };
        parts.push(part);
    }
    parts.join(",")
}

/// Pods whose controller owner reference points at `owner_uid`.
pub fn filter_owned(pods: Vec<Pod>, owner_uid: &str) -> Vec<Pod> {
    pods.into_iter()
        .filter(|p| {
            p.metadata
                .owner_references
                .iter()
                .flatten()
                .any(|o| o.controller == Some(true) && o.uid == owner_uid)
        })
        .collect()
}

/// List the live pods controlled by `sts`, in API order.
pub async fn list_owned_pods(client: &Client, sts: &StatefulSet) -> Result<Vec<Pod>> {
    let namespace = sts.namespace().unwrap_or_default();
    let uid = sts.metadata.uid.clone().unwrap_or_default();
    let selector = sts.spec.as_ref().map(|s| selector_query(&s.selector)).unwrap_or_default();
    let mut lp = ListParams::default();
    if !selector.is_empty() {
        lp = lp.labels(&selector);
    }
    let api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let list = api.list(&lp).await.with_context(|| format!("listing pods in {namespace} for selector {selector:?}"))?;
    let pods = filter_owned(list.items, &uid);
    debug!(ns = %namespace, sts = %sts.name_any(), count = pods.len(), "owned pods listed");
    Ok(pods)
}

/// Display status of a pod: terminating, then the first waiting/terminated container reason, then the phase.
pub fn pod_status(pod: &Pod) -> String {
    if pod.metadata.deletion_timestamp.is_some() {
        return "Terminating".to_string();
    }
    let status = pod.status.as_ref();
    let reason = status
        .and_then(|s| s.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|cs| cs.state.as_ref())
        .find_map(|st| {
            st.waiting
                .as_ref()
                .and_then(|w| w.reason.clone())
                .or_else(|| st.terminated.as_ref().and_then(|t| t.reason.clone()))
                .filter(|r| !r.is_empty())
        });
    reason
        .or_else(|| status.and_then(|s| s.phase.clone()))
        .unwrap_or_else(|| "Unknown".to_string())
}

pub fn restart_count(pod: &Pod) -> i32 {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|cs| cs.iter().map(|c| c.restart_count).sum())
        .unwrap_or(0)
}

pub fn pod_summary(pod: &Pod) -> PodSummary {
    PodSummary {
        object_meta: ObjectMeta::from(&pod.metadata),
        type_meta: TypeMeta::new(ResourceKind::Pod),
        status: pod_status(pod),
        restart_count: restart_count(pod),
        node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        metrics: None,
    }
}

/// Summaries of the pods owned by the named StatefulSet (unselected, API order).
pub async fn get_statefulset_pods(client: &Client, namespace: &str, name: &str) -> Result<Vec<PodSummary>> {
    let sts = get_statefulset(client, namespace, name).await?;
    let pods = list_owned_pods(client, &sts).await?;
    Ok(pods.iter().map(pod_summary).collect())
}

/// Pod counts for `sts` from its spec/status and the phases of its live pods.
pub async fn get_statefulset_pod_info(client: &Client, sts: &StatefulSet) -> Result<PodInfo> {
    let pods = list_owned_pods(client, sts).await?;
    Ok(pod_info_for(sts, &pods))
}

pub fn pod_info_for(sts: &StatefulSet, pods: &[Pod]) -> PodInfo {
    let current = sts.status.as_ref().map(|s| s.replicas).unwrap_or(0);
    let desired = sts.spec.as_ref().and_then(|s| s.replicas);
    let phases = pods.iter().filter_map(|p| p.status.as_ref().and_then(|s| s.phase.as_deref()));
    PodInfo::from_phases(current, desired, phases)
}

/// Event type with empty types resolved from the reason.
pub fn event_type(type_: Option<&str>, reason: &str) -> String {
    match type_ {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => {
            let reason = reason.to_lowercase();
            if FAILED_REASON_PARTIALS.iter().any(|p| reason.contains(p)) {
                "Warning".to_string()
            } else {
                "Normal".to_string()
            }
        }
    }
}

pub fn event_from(ev: &KubeEvent) -> Event {
    let reason = ev.reason.clone().unwrap_or_default();
    let source = ev.source.as_ref();
    let micro = ev.event_time.as_ref().map(|t| t.0);
    Event {
        object_meta: ObjectMeta::from(&ev.metadata),
        type_meta: TypeMeta::new(ResourceKind::Event),
        message: ev.message.clone().unwrap_or_default(),
        source_component: source.and_then(|s| s.component.clone()).unwrap_or_default(),
        source_host: source.and_then(|s| s.host.clone()).unwrap_or_default(),
        sub_object: ev.involved_object.field_path.clone().unwrap_or_default(),
        count: ev.count.unwrap_or(1),
        first_seen: ev.first_timestamp.as_ref().map(|t| t.0).or(micro),
        last_seen: ev.last_timestamp.as_ref().map(|t| t.0).or(micro),
        type_: event_type(ev.type_.as_deref(), &reason),
        reason,
    }
}

/// Events whose involved object is `namespace/name`, in API order.
pub async fn get_resource_events(client: &Client, namespace: &str, name: &str) -> Result<Vec<Event>> {
    let api: Api<KubeEvent> = Api::namespaced(client.clone(), namespace);
    let lp = ListParams::default().fields(&format!("involvedObject.name={name}"));
    let list = api.list(&lp).await.with_context(|| format!("listing events for {namespace}/{name}"))?;
    let events: Vec<Event> = list
        .items
        .iter()
        .filter(|e| e.involved_object.namespace.as_deref() == Some(namespace))
        .map(event_from)
        .collect();
    debug!(ns = %namespace, name = %name, count = events.len(), "events listed");
    Ok(events)
}

/// CPU/memory usage from metrics.k8s.io for the named pods; pods without samples are absent.
pub async fn fetch_pod_metrics(client: &Client, namespace: &str, pod_names: &[String]) -> Result<HashMap<String, PodMetrics>> {
    let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
    let ar = ApiResource::from_gvk_with_plural(&gvk, "pods");
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &ar);
    let list = api.list(&ListParams::default()).await.with_context(|| format!("listing pod metrics in {namespace}"))?;
    let wanted: HashSet<&str> = pod_names.iter().map(String::as_str).collect();
    Ok(list
        .items
        .iter()
        .filter(|m| wanted.contains(m.name_any().as_str()))
        .map(|m| (m.name_any(), parse_pod_metrics_usage(&m.data)))
        .collect())
}

/// Sum of container usage in a PodMetrics payload.
pub fn parse_pod_metrics_usage(data: &Value) -> PodMetrics {
    data.get("containers")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|c| c.get("usage"))
        .map(|usage| PodMetrics {
            cpu_millicores: usage.get("cpu").and_then(Value::as_str).and_then(parse_cpu_millicores).unwrap_or(0),
            memory_bytes: usage.get("memory").and_then(Value::as_str).and_then(parse_memory_bytes).unwrap_or(0),
        })
        .sum()
}

pub fn parse_cpu_millicores(value: &str) -> Option<u64> {
    let raw = value.trim();
    let (number, per_unit) = if let Some(n) = raw.strip_suffix('n') {
        (n, 0.000_001)
    } else if let Some(n) = raw.strip_suffix('u') {
        (n, 0.001)
    } else if let Some(n) = raw.strip_suffix('m') {
        (n, 1.0)
    } else {
        (raw, 1000.0)
    };
    scaled(number, per_unit)
}

pub fn parse_memory_bytes(value: &str) -> Option<u64> {
    const UNITS: [(&str, f64); 12] = [
        ("Ki", 1024.0),
        ("Mi", 1_048_576.0),
        ("Gi", 1_073_741_824.0),
        ("Ti", 1_099_511_627_776.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ei", 1_152_921_504_606_846_976.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];
    let raw = value.trim();
    for (suffix, mult) in UNITS {
        if let Some(n) = raw.strip_suffix(suffix) {
            return scaled(n, mult);
        }
    }
    match raw.strip_suffix('m') {
        Some(n) => scaled(n, 0.001),
        None => scaled(raw, 1.0),
    }
}

fn scaled(number: &str, mult: f64) -> Option<u64> {
    let v = (number.parse::<f64>().ok()? * mult).round();
    (v.is_finite() && v >= 0.0).then_some(v as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateWaiting, ContainerStatus, ObjectReference, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelectorRequirement, ObjectMeta as KubeMeta, OwnerReference};
    use std::collections::BTreeMap;

    fn owned_pod(name: &str, owner: &str, controller: bool, phase: &str) -> Pod {
        Pod {
            metadata: KubeMeta {
                name: Some(name.into()),
                owner_references: Some(vec![OwnerReference {
                    api_version: "apps/v1".into(),
                    kind: "StatefulSet".into(),
                    name: "web".into(),
                    uid: owner.into(),
                    controller: Some(controller),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            status: Some(PodStatus { phase: Some(phase.into()), ..Default::default() }),
            ..Default::default()
        }
    }

    #[test]
    fn selector_renders_labels_and_expressions() {
        let sel = LabelSelector {
            match_labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
            match_expressions: Some(vec![
                LabelSelectorRequirement { key: "tier".into(), operator: "In".into(), values: Some(vec!["a".into(), "b".into()]) },
                LabelSelectorRequirement { key: "canary".into(), operator: "DoesNotExist".into(), values: None },
                LabelSelectorRequirement { key: "zone".into(), operator: "Exists".into(), values: None },
            ]),
        };
        assert_eq!(selector_query(&sel), "app=web,tier in (a,b),!canary,zone");
        assert_eq!(selector_query(&LabelSelector::default()), "");
    }

    #[test]
    fn only_controller_owned_pods_are_kept() {
        let pods = vec![
            owned_pod("web-0", "uid-1", true, "Running"),
            owned_pod("web-1", "uid-1", false, "Running"),
            owned_pod("other-0", "uid-2", true, "Running"),
            Pod::default(),
        ];
        let kept: Vec<String> = filter_owned(pods, "uid-1").iter().map(|p| p.name_any()).collect();
        assert_eq!(kept, vec!["web-0"]);
    }

    #[test]
    fn pod_info_uses_spec_status_and_phases() {
        let sts = StatefulSet {
            spec: Some(k8s_openapi::api::apps::v1::StatefulSetSpec { replicas: Some(3), ..Default::default() }),
            status: Some(k8s_openapi::api::apps::v1::StatefulSetStatus { replicas: 3, ..Default::default() }),
            ..Default::default()
        };
        let pods = vec![
            owned_pod("web-0", "u", true, "Running"),
            owned_pod("web-1", "u", true, "Running"),
            owned_pod("web-2", "u", true, "Pending"),
        ];
        let info = pod_info_for(&sts, &pods);
        assert_eq!((info.current, info.desired, info.running, info.pending), (3, Some(3), 2, 1));
    }

    #[test]
    fn pod_status_prefers_container_reason() {
        let mut pod = owned_pod("web-0", "u", true, "Running");
        assert_eq!(pod_status(&pod), "Running");
        if let Some(st) = pod.status.as_mut() {
            st.container_statuses = Some(vec![ContainerStatus {
                name: "web".into(),
                restart_count: 4,
                state: Some(ContainerState {
                    waiting: Some(ContainerStateWaiting { reason: Some("CrashLoopBackOff".into()), message: None }),
                    ..Default::default()
                }),
                ..Default::default()
            }]);
        }
        assert_eq!(pod_status(&pod), "CrashLoopBackOff");
        assert_eq!(restart_count(&pod), 4);
        assert_eq!(pod_status(&Pod::default()), "Unknown");
    }

    #[test]
    fn untyped_events_are_classified_by_reason() {
        assert_eq!(event_type(None, "FailedCreate"), "Warning");
        assert_eq!(event_type(Some(""), "BackOff"), "Warning");
        assert_eq!(event_type(None, "SuccessfulCreate"), "Normal");
        assert_eq!(event_type(Some("Normal"), "FailedMount"), "Normal");

        let ev = KubeEvent {
            involved_object: ObjectReference { field_path: Some("spec.containers{web}".into()), ..Default::default() },
            reason: Some("Unhealthy".into()),
            ..Default::default()
        };
        let e = event_from(&ev);
        assert_eq!(e.type_, "Warning");
        assert_eq!(e.sub_object, "spec.containers{web}");
        assert_eq!(e.count, 1);
    }

    #[test]
    fn parses_quantities() {
        assert_eq!(parse_cpu_millicores("250m"), Some(250));
        assert_eq!(parse_cpu_millicores("2"), Some(2000));
        assert_eq!(parse_cpu_millicores("1500000n"), Some(2));
        assert_eq!(parse_memory_bytes("64Mi"), Some(67_108_864));
        assert_eq!(parse_memory_bytes("1k"), Some(1000));
        assert_eq!(parse_memory_bytes("512"), Some(512));
        assert_eq!(parse_memory_bytes("oops"), None);
    }

    #[test]
    fn sums_container_usage() {
        let data = serde_json::json!({
            "containers": [
                { "name": "a", "usage": { "cpu": "100m", "memory": "1Mi" } },
                { "name": "b", "usage": { "cpu": "50m", "memory": "1Mi" } },
            ]
        });
        assert_eq!(parse_pod_metrics_usage(&data), PodMetrics { cpu_millicores: 150, memory_bytes: 2_097_152 });
        assert_eq!(parse_pod_metrics_usage(&serde_json::json!({})), PodMetrics::default());
    }
}
