//! Removal of generated children an association no longer needs, e.g. after
//! it was pointed at another cluster or workload.
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

use crate::{
    client::{ObjectStore, ResourceId, Result, StoreObject},
    crd::{association::Association, user::User},
    kvp::association_labels,
};

/// Deletes every user and Secret generated for `association` that is not in
/// `expected`. `namespace` restricts the search, [`None`] searches everywhere
/// the operator can see.
pub async fn delete_orphans<S: ObjectStore>(
    store: &S,
    association: &Association,
    namespace: Option<&str>,
    expected: &[ResourceId],
) -> Result<()> {
    delete_orphans_of::<Secret, S>(store, association, namespace, expected).await?;
    delete_orphans_of::<User, S>(store, association, namespace, expected).await
}

async fn delete_orphans_of<K: StoreObject, S: ObjectStore>(
    store: &S,
    association: &Association,
    namespace: Option<&str>,
    expected: &[ResourceId],
) -> Result<()> {
    let children = store
        .list::<K>(namespace, &association_labels(association))
        .await?;

    for child in children {
        let id = ResourceId::of(&child);
        if expected.contains(&id) || !is_owned_by(&child, association) {
            continue;
        }

        tracing::info!(object = %id, "deleting orphaned child");
        match store.delete::<K>(&id.namespace, &id.name).await {
            Err(err) if !err.is_not_found() => return Err(err),
            _ => {}
        }
    }
    Ok(())
}

/// Children across namespaces carry no owner reference, the association
/// labels are all they have. Owned ones must be owned by this very object,
/// not by a deleted namesake.
fn is_owned_by<K: StoreObject>(child: &K, association: &Association) -> bool {
    let owners = child.owner_references();
    owners.is_empty()
        || owners
            .iter()
            .any(|owner| Some(&owner.uid) == association.metadata.uid.as_ref())
}
