#![forbid(unsafe_code)]

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetStatus};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as KubeMeta;
use keel_core::detail::assemble;
use keel_core::{Event, EventList, ListMeta, ObjectMeta, PodInfo, PodList, PodSummary, ResourceKind, TypeMeta};

fn record(images: &[&str]) -> StatefulSet {
    StatefulSet {
        metadata: KubeMeta {
            name: Some("web".into()),
            namespace: Some("ns1".into()),
            uid: Some("sts-uid".into()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(3),
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers: images
                        .iter()
                        .map(|i| Container { name: "web".into(), image: Some(i.to_string()), ..Default::default() })
                        .collect(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        status: Some(StatefulSetStatus { replicas: 3, ..Default::default() }),
    }
}

fn pod(name: &str, status: &str) -> PodSummary {
    PodSummary {
        object_meta: ObjectMeta { name: name.into(), namespace: Some("ns1".into()), ..Default::default() },
        type_meta: TypeMeta::new(ResourceKind::Pod),
        status: status.into(),
        restart_count: 0,
        node_name: Some("node-a".into()),
        metrics: None,
    }
}

fn event(reason: &str) -> Event {
    Event {
        object_meta: ObjectMeta { name: format!("web.{reason}"), namespace: Some("ns1".into()), ..Default::default() },
        type_meta: TypeMeta::new(ResourceKind::Event),
        message: format!("{reason} happened"),
        source_component: "statefulset-controller".into(),
        source_host: String::new(),
        sub_object: String::new(),
        count: 1,
        first_seen: None,
        last_seen: None,
        reason: reason.into(),
        type_: "Normal".into(),
    }
}

fn parts() -> (EventList, PodList, PodInfo) {
    let pods = vec![pod("web-0", "Running"), pod("web-1", "Running"), pod("web-2", "Pending")];
    let info = PodInfo::from_phases(3, Some(3), pods.iter().map(|p| p.status.as_str()));
    let pod_list = PodList { list_meta: ListMeta { total_items: 3 }, cumulative_metrics: None, pods };
    let events = vec![event("SuccessfulCreate"), event("SuccessfulUpdate")];
    let event_list = EventList { list_meta: ListMeta { total_items: 2 }, events };
    (event_list, pod_list, info)
}

#[test]
fn end_to_end_statefulset_detail() {
    let rec = record(&["nginx:1.14", "nginx:1.14"]);
    let (events, pods, info) = parts();
    let d = assemble(&rec, &events, &pods, &info);

    assert_eq!(d.object_meta.name, "web");
    assert_eq!(d.object_meta.namespace.as_deref(), Some("ns1"));
    assert_eq!(d.type_meta.kind, ResourceKind::StatefulSet);
    assert_eq!(d.container_images, vec!["nginx:1.14"]);
    assert_eq!(d.pod_info.running, 2);
    assert_eq!(d.pod_info.pending, 1);
    assert_eq!(d.pod_info.current, 3);
    assert_eq!(d.pod_list.pods.len(), 3);
    assert_eq!(d.event_list.events.len(), 2);
    assert_eq!(d.pod_list, pods);
    assert_eq!(d.event_list, events);
    assert_eq!(d.pod_info, info);
}

#[test]
fn assemble_is_deterministic_and_leaves_inputs_alone() {
    let rec = record(&["a", "a", "b"]);
    let (events, pods, info) = parts();
    let before = (rec.clone(), events.clone(), pods.clone(), info.clone());

    let first = assemble(&rec, &events, &pods, &info);
    let second = assemble(&rec, &events, &pods, &info);

    assert_eq!(first, second);
    assert_eq!(first.container_images, vec!["a", "b"]);
    assert_eq!((rec, events, pods, info), before);
}

#[test]
fn detail_serializes_with_display_field_names() {
    let (events, pods, info) = parts();
    let d = assemble(&record(&["nginx:1.14"]), &events, &pods, &info);
    let v = serde_json::to_value(&d).expect("serialize");
    for k in ["objectMeta", "typeMeta", "podInfo", "podList", "containerImages", "eventList"] {
        assert!(v.get(k).is_some(), "missing key {k} in {v}");
    }
    assert_eq!(v["typeMeta"]["kind"], "statefulset");
    assert_eq!(v["podList"]["listMeta"]["totalItems"], 3);
    assert_eq!(v["eventList"]["events"][0]["type"], "Normal");
}
