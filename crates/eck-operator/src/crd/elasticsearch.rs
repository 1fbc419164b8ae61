use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::crds::{raw_object_list_schema, raw_object_schema};

pub const HTTP_PORT: u16 = 9200;
pub const CA_CERT_KEY: &str = "ca.crt";

/// The desired state of an Elasticsearch cluster.
#[derive(Clone, CustomResource, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "elasticsearch.k8s.elastic.co",
    version = "v1beta1",
    kind = "Elasticsearch",
    plural = "elasticsearches",
    shortname = "es",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSpec {
    /// The Elasticsearch version, for example `7.4.0`. See the
    /// [supported versions](DOCS_BASE_URL_PLACEHOLDER/k8s-supported.html).
    pub version: String,

    /// Groups of nodes sharing the same configuration. Read more about
    /// [node configuration](DOCS_BASE_URL_PLACEHOLDER/k8s-node-configuration.html).
    #[serde(default)]
    pub node_sets: Vec<NodeSet>,

    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSet {
    pub name: String,

    #[serde(default)]
    pub count: i32,

    /// Elasticsearch settings applied to every node of the set. Node roles are
    /// configured through `node.master`, `node.data`, `node.ingest` and `node.ml`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub config: Option<BTreeMap<String, Value>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "raw_object_list_schema")]
    pub volume_claim_templates: Vec<Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default)]
    pub tls: TlsOptions,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signed_certificate: Option<SelfSignedCertificate>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfSignedCertificate {
    #[serde(default)]
    pub subject_alt_names: Vec<SubjectAlternativeName>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct SubjectAlternativeName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Roles a node of a [`NodeSet`] takes on. Every role defaults to enabled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodeRoles {
    pub master: bool,
    pub data: bool,
    pub ingest: bool,
    pub ml: bool,
}

impl NodeSet {
    /// Settings with nested objects collapsed into dotted keys, so that
    /// `node: {master: false}` and `node.master: false` read the same.
    pub fn flattened_config(&self) -> BTreeMap<String, Value> {
        let mut flat = BTreeMap::new();
        for (key, value) in self.config.iter().flatten() {
            flatten_into(&mut flat, key.clone(), value);
        }
        flat
    }

    pub fn roles(&self) -> NodeRoles {
        let config = self.flattened_config();
        let role = |key: &str| config.get(key).and_then(setting_as_bool).unwrap_or(true);

        NodeRoles {
            master: role("node.master"),
            data: role("node.data"),
            ingest: role("node.ingest"),
            ml: role("node.ml"),
        }
    }
}

fn flatten_into(flat: &mut BTreeMap<String, Value>, prefix: String, value: &Value) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, nested) in map {
                flatten_into(flat, format!("{prefix}.{key}"), nested);
            }
        }
        _ => {
            flat.insert(prefix, value.clone());
        }
    }
}

fn setting_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Name of the Secret holding the public CA of the cluster's HTTP layer.
pub fn http_ca_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-http-ca")
}

/// URL under which the cluster's HTTP layer is reachable from within the plane.
pub fn http_service_url(cluster_name: &str, namespace: &str) -> String {
    format!("https://{cluster_name}-http.{namespace}.svc:{HTTP_PORT}")
}

/// Name of the Secret holding the cluster license applied to a cluster.
pub fn license_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-license")
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;
    use crate::CustomResourceExt;

    #[test]
    fn crd_links_to_the_release_docs() {
        let yaml = Elasticsearch::yaml_schema("1.2.3").unwrap();
        assert!(yaml.contains(
            "https://www.elastic.co/guide/en/cloud-on-k8s/1.2/k8s-node-configuration.html"
        ));
        assert!(!yaml.contains("DOCS_BASE_URL_PLACEHOLDER"));
    }

    fn node_set(yaml: &str) -> NodeSet {
        serde_yaml::from_str(yaml).expect("test node set must parse")
    }

    #[test]
    fn roles_default_to_enabled() {
        let set = node_set("name: default\ncount: 3\n");
        assert_eq!(
            set.roles(),
            NodeRoles {
                master: true,
                data: true,
                ingest: true,
                ml: true
            }
        );
    }

    #[rstest]
    #[case::dotted(indoc! {"
        name: data
        count: 3
        config:
          node.master: false
    "})]
    #[case::nested(indoc! {"
        name: data
        count: 3
        config:
          node:
            master: false
    "})]
    #[case::string(indoc! {"
        name: data
        count: 3
        config:
          node.master: \"false\"
    "})]
    fn master_role_can_be_disabled(#[case] yaml: &str) {
        let roles = node_set(yaml).roles();
        assert!(!roles.master);
        assert!(roles.data);
    }

    #[test]
    fn flattened_config_collapses_nested_keys() {
        let set = node_set(indoc! {"
            name: default
            config:
              xpack:
                security:
                  transport.ssl:
                    enabled: true
              cluster.name: foo
        "});

        let flat = set.flattened_config();
        assert_eq!(
            flat.keys().collect::<Vec<_>>(),
            vec!["cluster.name", "xpack.security.transport.ssl.enabled"]
        );
    }

    #[test]
    fn derived_names() {
        assert_eq!(http_ca_secret_name("foo"), "foo-http-ca");
        assert_eq!(
            http_service_url("foo", "default"),
            "https://foo-http.default.svc:9200"
        );
        assert_eq!(license_secret_name("foo"), "foo-license");
    }
}
