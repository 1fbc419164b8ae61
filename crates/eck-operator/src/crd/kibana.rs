use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A Kibana instance consuming an Elasticsearch cluster.
#[derive(Clone, CustomResource, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "kibana.k8s.elastic.co",
    version = "v1beta1",
    kind = "Kibana",
    plural = "kibanas",
    shortname = "kb",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KibanaSpec {
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i32>,

    /// Connection to the backing Elasticsearch cluster. Managed by the
    /// association controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elasticsearch: Option<BackendElasticsearch>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendElasticsearch {
    pub url: String,

    /// Name of a Secret holding the CA certificate under `ca.crt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_secret: Option<String>,

    #[serde(default)]
    pub auth: ElasticsearchAuth,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<SecretKeyRef>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}
