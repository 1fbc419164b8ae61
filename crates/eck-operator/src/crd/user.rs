use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An operator-managed user of an Elasticsearch cluster, living next to the
/// cluster. The clear-text password is kept in a separate Secret.
#[derive(Clone, CustomResource, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "elasticsearch.k8s.elastic.co",
    version = "v1alpha1",
    kind = "User",
    plural = "users",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    pub name: String,

    /// bcrypt hash of the user's password.
    pub password_hash: String,

    #[serde(default)]
    pub user_roles: Vec<String>,
}
