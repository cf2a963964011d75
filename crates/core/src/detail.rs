//! StatefulSet detail view and its pure assembler.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::PodSpec;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::{EventList, ObjectMeta, PodInfo, PodList, ResourceKind, TypeMeta};

/// Presentation view of a StatefulSet: the object plus pods, pod counts, images and events
/// gathered from separate lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetDetail {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    /// Aggregate information about pods belonging to this StatefulSet.
    pub pod_info: PodInfo,
    /// Detailed information about pods belonging to this StatefulSet.
    pub pod_list: PodList,
    /// Distinct container images of the pod template, in declaration order.
    pub container_images: Vec<String>,
    /// Events related to this StatefulSet.
    pub event_list: EventList,
}

/// Combine already fetched parts into a detail view. Pure; inputs are only read.
pub fn assemble(record: &StatefulSet, event_list: &EventList, pod_list: &PodList, pod_info: &PodInfo) -> StatefulSetDetail {
    let template = record.spec.as_ref().and_then(|s| s.template.spec.as_ref());
    StatefulSetDetail {
        object_meta: ObjectMeta::from(&record.metadata),
        type_meta: TypeMeta::new(ResourceKind::StatefulSet),
        pod_info: pod_info.clone(),
        pod_list: pod_list.clone(),
        container_images: container_images(template),
        event_list: event_list.clone(),
    }
}

/// Images of the template's containers, deduplicated by first occurrence.
pub fn container_images(spec: Option<&PodSpec>) -> Vec<String> {
    let Some(spec) = spec else { return Vec::new() };
    let mut seen = FxHashSet::default();
    spec.containers
        .iter()
        .filter_map(|c| c.image.as_deref())
        .filter(|image| !image.is_empty())
        .filter(|image| seen.insert(*image))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Container;

    fn spec(images: &[&str]) -> PodSpec {
        PodSpec {
            containers: images
                .iter()
                .enumerate()
                .map(|(i, img)| Container { name: format!("c{i}"), image: Some(img.to_string()), ..Default::default() })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn images_dedup_in_first_occurrence_order() {
        assert_eq!(container_images(Some(&spec(&["a", "a", "b"]))), vec!["a", "b"]);
        assert_eq!(container_images(Some(&spec(&["b", "a", "b", "a"]))), vec!["b", "a"]);
    }

    #[test]
    fn images_skip_missing_and_empty() {
        let mut s = spec(&["", "nginx:1.14"]);
        s.containers.push(Container { name: "noimg".into(), image: None, ..Default::default() });
        assert_eq!(container_images(Some(&s)), vec!["nginx:1.14"]);
        assert!(container_images(None).is_empty());
    }

    #[test]
    fn assemble_without_spec_has_no_images() {
        let record = StatefulSet::default();
        let d = assemble(&record, &EventList::default(), &PodList::default(), &PodInfo::default());
        assert!(d.container_images.is_empty());
        assert_eq!(d.type_meta.kind, ResourceKind::StatefulSet);
    }
}
