//! Access to the orchestration store.
//!
//! Controllers talk to the store through the [`ObjectStore`] trait. [`Client`]
//! implements it on top of the Kubernetes API; tests use an in-memory store.
use std::{
    collections::BTreeMap,
    fmt::{self, Debug, Display, Formatter},
};

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    Api, Resource, ResourceExt,
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use snafu::{ResultExt, Snafu};

use crate::kvp::label_selector;

#[cfg(test)]
pub mod memory;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// How an error coming out of the store is to be handled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Forbidden,
    Other,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to get {object}"))]
    GetObject {
        source: kube::Error,
        object: ResourceId,
    },

    #[snafu(display("failed to list {kind} objects"))]
    ListObjects { source: kube::Error, kind: String },

    #[snafu(display("failed to create {object}"))]
    CreateObject {
        source: kube::Error,
        object: ResourceId,
    },

    #[snafu(display("failed to replace {object}"))]
    ReplaceObject {
        source: kube::Error,
        object: ResourceId,
    },

    #[snafu(display("failed to patch {object}"))]
    PatchObject {
        source: kube::Error,
        object: ResourceId,
    },

    #[snafu(display("failed to delete {object}"))]
    DeleteObject {
        source: kube::Error,
        object: ResourceId,
    },

    #[snafu(display("{object} does not exist"))]
    NotFound { object: ResourceId },

    #[snafu(display("{object} was modified concurrently"))]
    Conflict { object: ResourceId },

    #[snafu(display("failed to convert {object} from or to JSON"))]
    ConvertObject {
        source: serde_json::Error,
        object: ResourceId,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::GetObject { source, .. }
            | Self::ListObjects { source, .. }
            | Self::CreateObject { source, .. }
            | Self::ReplaceObject { source, .. }
            | Self::PatchObject { source, .. }
            | Self::DeleteObject { source, .. } => api_error_kind(source),
            Self::ConvertObject { .. } => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn is_forbidden(&self) -> bool {
        self.kind() == ErrorKind::Forbidden
    }
}

fn api_error_kind(error: &kube::Error) -> ErrorKind {
    match error {
        kube::Error::Api(ae) if ae.code == 404 => ErrorKind::NotFound,
        kube::Error::Api(ae) if ae.code == 409 => ErrorKind::Conflict,
        kube::Error::Api(ae) if ae.code == 403 => ErrorKind::Forbidden,
        _ => ErrorKind::Other,
    }
}

/// Identity of a namespaced object in the store.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResourceId {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new<K: Resource<DynamicType = ()>>(namespace: &str, name: &str) -> Self {
        Self {
            kind: K::kind(&()).into_owned(),
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        }
    }

    pub fn of<K: Resource<DynamicType = ()>>(object: &K) -> Self {
        Self::new::<K>(&object.namespace().unwrap_or_default(), &object.name_any())
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Objects the operator reads and writes. Only namespaced kinds are involved.
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<T> StoreObject for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}

/// Reads and idempotent writes against the orchestration store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches an object, [`None`] if it does not exist.
    async fn get_opt<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Lists objects carrying all `labels`, in `namespace` or across all
    /// namespaces the operator can see.
    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>>;

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K>;

    /// Replaces an existing object. Fails with a conflict if the object changed
    /// since `object` was read.
    async fn replace<K: StoreObject>(&self, object: &K) -> Result<K>;

    /// Applies a JSON merge patch.
    async fn merge_patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<K>;

    /// Merges `status` into the status subresource.
    async fn merge_patch_status<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<K>;

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K> {
        self.get_opt(namespace, name).await?.ok_or_else(|| Error::NotFound {
            object: ResourceId::new::<K>(namespace, name),
        })
    }
}

/// This `Client` can be used to access Kubernetes.
/// It wraps an underlying [`kube::Client`] and applies the operator's field
/// manager to every write.
#[derive(Clone)]
pub struct Client {
    client: kube::Client,
    post_params: PostParams,
    patch_params: PatchParams,
    delete_params: DeleteParams,
}

impl Client {
    pub fn new(client: kube::Client, field_manager: &str) -> Self {
        Self {
            client,
            post_params: PostParams {
                field_manager: Some(field_manager.to_owned()),
                ..PostParams::default()
            },
            patch_params: PatchParams {
                field_manager: Some(field_manager.to_owned()),
                ..PatchParams::default()
            },
            delete_params: DeleteParams::default(),
        }
    }

    pub fn as_kube_client(&self) -> kube::Client {
        self.client.clone()
    }

    fn namespaced_api<K: StoreObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ObjectStore for Client {
    async fn get_opt<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.namespaced_api::<K>(namespace)
            .get_opt(name)
            .await
            .context(GetObjectSnafu {
                object: ResourceId::new::<K>(namespace, name),
            })
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let api: Api<K> = match namespace {
            Some(namespace) => self.namespaced_api(namespace),
            None => Api::all(self.client.clone()),
        };
        let params = ListParams::default().labels(&label_selector(labels));

        Ok(api
            .list(&params)
            .await
            .context(ListObjectsSnafu {
                kind: K::kind(&()).into_owned(),
            })?
            .items)
    }

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K> {
        let id = ResourceId::of(object);
        self.namespaced_api::<K>(&id.namespace)
            .create(&self.post_params, object)
            .await
            .context(CreateObjectSnafu { object: id })
    }

    async fn replace<K: StoreObject>(&self, object: &K) -> Result<K> {
        let id = ResourceId::of(object);
        self.namespaced_api::<K>(&id.namespace)
            .replace(&id.name, &self.post_params, object)
            .await
            .context(ReplaceObjectSnafu { object: id })
    }

    async fn merge_patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<K> {
        self.namespaced_api::<K>(namespace)
            .patch(name, &self.patch_params, &Patch::Merge(&patch))
            .await
            .context(PatchObjectSnafu {
                object: ResourceId::new::<K>(namespace, name),
            })
    }

    async fn merge_patch_status<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<K> {
        self.namespaced_api::<K>(namespace)
            .patch_status(
                name,
                &self.patch_params,
                &Patch::Merge(&json!({ "status": status })),
            )
            .await
            .context(PatchObjectSnafu {
                object: ResourceId::new::<K>(namespace, name),
            })
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<()> {
        self.namespaced_api::<K>(namespace)
            .delete(name, &self.delete_params)
            .await
            .context(DeleteObjectSnafu {
                object: ResourceId::new::<K>(namespace, name),
            })?;
        Ok(())
    }
}
