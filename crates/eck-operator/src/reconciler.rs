//! Declarative create-or-update of a single object.
//!
//! Callers describe the object they expect and how to tell whether an existing
//! one is good enough, [`reconcile_resource`] makes the store match.
use kube::{Resource, ResourceExt};
use snafu::{ResultExt, Snafu};

use crate::client::{self, ErrorKind, ObjectStore, ResourceId, StoreObject};

/// Concurrent writers make an attempt fail with a conflict, after which the
/// object is read again. Give up after this many attempts.
const MAX_ATTEMPTS: usize = 5;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to reconcile {object}"))]
    Store {
        source: client::Error,
        object: ResourceId,
    },

    #[snafu(display("{object} kept changing concurrently, gave up after {attempts} attempts"))]
    ConflictRetries { object: ResourceId, attempts: usize },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store { source, .. } => source.kind(),
            Self::ConflictRetries { .. } => ErrorKind::Conflict,
        }
    }

    pub fn object(&self) -> &ResourceId {
        match self {
            Self::Store { object, .. } | Self::ConflictRetries { object, .. } => object,
        }
    }
}

/// Decides whether an existing object matches the expected one, and how to
/// make it match.
pub trait UpdatePolicy<K> {
    /// Only called for objects that exist already.
    fn needs_update(&self, expected: &K, reconciled: &K) -> bool;

    /// Transforms `reconciled`, as read from the store, into the form written back.
    fn update_reconciled(&self, expected: &K, reconciled: &mut K);
}

/// An [`UpdatePolicy`] made of two closures.
pub struct Policy<N, U> {
    pub needs_update: N,
    pub update_reconciled: U,
}

impl<K, N, U> UpdatePolicy<K> for Policy<N, U>
where
    N: Fn(&K, &K) -> bool,
    U: Fn(&K, &mut K),
{
    fn needs_update(&self, expected: &K, reconciled: &K) -> bool {
        (self.needs_update)(expected, reconciled)
    }

    fn update_reconciled(&self, expected: &K, reconciled: &mut K) {
        (self.update_reconciled)(expected, reconciled);
    }
}

/// Ensures `expected` exists, returning the object as stored after the call.
///
/// A missing object is created from `expected`, controlled by `owner` if both
/// live in the same namespace. Owner references cannot cross namespaces. The
/// owner reference is never rewritten once the object exists.
pub async fn reconcile_resource<K, O, S, P>(
    store: &S,
    owner: &O,
    expected: &K,
    policy: &P,
) -> Result<K, Error>
where
    K: StoreObject,
    O: Resource<DynamicType = ()>,
    S: ObjectStore,
    P: UpdatePolicy<K> + Sync,
{
    let object = ResourceId::of(expected);

    for _ in 0..MAX_ATTEMPTS {
        let existing = store
            .get_opt::<K>(&object.namespace, &object.name)
            .await
            .context(StoreSnafu {
                object: object.clone(),
            })?;

        let result = match existing {
            None => {
                let mut reconciled = expected.clone();
                if owner.namespace() == reconciled.namespace() {
                    reconciled.meta_mut().owner_references =
                        owner.controller_owner_ref(&()).map(|owner_ref| vec![owner_ref]);
                }
                tracing::info!(%object, "creating object");
                store.create(&reconciled).await
            }
            Some(mut reconciled) => {
                if !policy.needs_update(expected, &reconciled) {
                    return Ok(reconciled);
                }
                policy.update_reconciled(expected, &mut reconciled);
                tracing::info!(%object, "updating object");
                store.replace(&reconciled).await
            }
        };

        match result {
            Ok(reconciled) => return Ok(reconciled),
            Err(err) if err.is_conflict() => {
                tracing::debug!(%object, "conflict while reconciling, retrying");
            }
            Err(err) => return Err(err).context(StoreSnafu { object }),
        }
    }

    ConflictRetriesSnafu {
        object,
        attempts: MAX_ATTEMPTS,
    }
    .fail()
}
