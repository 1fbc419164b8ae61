//! Well-known label and annotation keys, plus the label sets generated
//! children carry.
use std::collections::BTreeMap;

use kube::{Resource, ResourceExt};

pub const ASSOCIATION_NAME_LABEL: &str = "association.k8s.elastic.co/name";
pub const ASSOCIATION_NAMESPACE_LABEL: &str = "association.k8s.elastic.co/namespace";
pub const TYPE_LABEL: &str = "common.k8s.elastic.co/type";
pub const USER_TYPE: &str = "user";

pub const LICENSE_TYPE_LABEL: &str = "license.k8s.elastic.co/type";
pub const LICENSE_NAME_LABEL: &str = "license.k8s.elastic.co/name";

pub const PAUSE_ANNOTATION: &str = "common.k8s.elastic.co/pause";
pub const EULA_ANNOTATION: &str = "elastic.co/eula";
pub const EULA_ACCEPTED: &str = "accepted";
pub const LICENSE_INVALID_ANNOTATION: &str = "license.k8s.elastic.co/invalid";

/// Labels selecting every child generated for the association `owner`.
pub fn association_labels<R: Resource>(owner: &R) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ASSOCIATION_NAME_LABEL.to_owned(), owner.name_any()),
        (
            ASSOCIATION_NAMESPACE_LABEL.to_owned(),
            owner.namespace().unwrap_or_default(),
        ),
    ])
}

/// Whether `labels` contains every entry of `selector`.
pub fn matches_labels(labels: &BTreeMap<String, String>, selector: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Renders `selector` in the `key=value,key2=value2` form the API server expects.
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn is_paused<R: Resource>(resource: &R) -> bool {
    resource
        .annotations()
        .get(PAUSE_ANNOTATION)
        .is_some_and(|value| value == "true")
}
