use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::crd::{NamespacedRef, elasticsearch::Elasticsearch, kibana::Kibana};

/// Links a Kibana instance to the Elasticsearch cluster backing it. The
/// association owns the credentials generated for that link.
#[derive(Clone, CustomResource, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "associations.k8s.elastic.co",
    version = "v1alpha1",
    kind = "Association",
    plural = "associations",
    status = "AssociationStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AssociationSpec {
    /// The backing Elasticsearch cluster.
    pub elasticsearch_ref: NamespacedRef<Elasticsearch>,

    /// The Kibana instance consuming the cluster.
    pub dependent_ref: NamespacedRef<Kibana>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationStatus {
    #[serde(default)]
    pub association: AssociationPhase,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    EnumString,
    Eq,
    Hash,
    JsonSchema,
    PartialEq,
    Serialize,
)]
pub enum AssociationPhase {
    #[default]
    Pending,
    Established,
    Failed,
}

impl Association {
    pub fn phase(&self) -> AssociationPhase {
        self.status
            .as_ref()
            .map(|status| status.association)
            .unwrap_or_default()
    }
}
