//! Finalizer bookkeeping on objects the operator owns cleanup for.
use kube::{Resource, ResourceExt};
use serde_json::json;

use crate::client::{ObjectStore, Result, StoreObject};

/// Runs the cleanup of associations before they go away: their children in
/// other namespaces cannot be owned through owner references.
pub const ASSOCIATION_FINALIZER: &str = "finalizer.association.k8s.elastic.co/elasticsearch";

/// Checks whether `finalizer` is in the list of finalizers of `resource`.
pub fn has_finalizer<T: Resource>(resource: &T, finalizer: &str) -> bool {
    resource.finalizers().iter().any(|f| f == finalizer)
}

/// Checks whether the provided object has a deletion timestamp set.
/// If that is the case the object is in the process of being deleted pending the handling of all finalizers.
pub fn has_deletion_stamp<T: Resource>(resource: &T) -> bool {
    resource.meta().deletion_timestamp.is_some()
}

/// Adds `finalizer` to `resource` unless it is already present.
///
/// The patch carries the observed resource version, so it fails with a
/// conflict if the finalizers changed in the meantime.
pub async fn add_finalizer<T, S>(store: &S, resource: &T, finalizer: &str) -> Result<T>
where
    T: StoreObject,
    S: ObjectStore + ?Sized,
{
    if has_finalizer(resource, finalizer) {
        return Ok(resource.clone());
    }

    let mut finalizers = resource.finalizers().to_vec();
    finalizers.push(finalizer.to_owned());
    patch_finalizers(store, resource, finalizers).await
}

/// Removes `finalizer` from `resource`, a no-op if it is not present.
pub async fn remove_finalizer<T, S>(store: &S, resource: &T, finalizer: &str) -> Result<T>
where
    T: StoreObject,
    S: ObjectStore + ?Sized,
{
    if !has_finalizer(resource, finalizer) {
        return Ok(resource.clone());
    }

    // It would be preferable to use a strategic merge but that doesn't
    // work against custom resources.
    let finalizers = resource
        .finalizers()
        .iter()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect::<Vec<_>>();
    patch_finalizers(store, resource, finalizers).await
}

async fn patch_finalizers<T, S>(store: &S, resource: &T, finalizers: Vec<String>) -> Result<T>
where
    T: StoreObject,
    S: ObjectStore + ?Sized,
{
    store
        .merge_patch(
            &resource.namespace().unwrap_or_default(),
            &resource.name_any(),
            json!({
                "metadata": {
                    "finalizers": finalizers,
                    "resourceVersion": resource.resource_version(),
                }
            }),
        )
        .await
}
