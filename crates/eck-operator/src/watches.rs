//! The dynamic watch registry: which objects a controller is interested in
//! beyond the ones it reconciles.
//!
//! An association registers the cluster and the dependent workload it points
//! at. Changes to those objects are mapped back to the associations through
//! [`DynamicWatches::watchers_of`].
use std::{
    collections::BTreeMap,
    sync::{PoisonError, RwLock},
};

use crate::client::ResourceId;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Registration {
    pub watched: ResourceId,
    pub watcher: ResourceId,
}

/// Named registrations. Registering under an existing name replaces the
/// previous registration, so re-registering on every reconcile is idempotent
/// and a moved reference drops the stale watch.
#[derive(Debug, Default)]
pub struct DynamicWatches {
    registrations: RwLock<BTreeMap<String, Registration>>,
}

/// Name of the registration `target` (e.g. `es`) of the association `name` in
/// `namespace`.
pub fn watch_name(namespace: &str, name: &str, target: &str) -> String {
    format!("{namespace}-{name}-{target}-watch")
}

impl DynamicWatches {
    pub fn add(&self, name: String, registration: Registration) {
        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if registrations.get(&name) != Some(&registration) {
            tracing::debug!(watch.name = %name, watched = %registration.watched, "registering watch");
            registrations.insert(name, registration);
        }
    }

    pub fn remove(&self, name: &str) {
        let removed = self
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if removed.is_some() {
            tracing::debug!(watch.name = name, "removed watch");
        }
    }

    /// Watchers interested in changes to `watched`, without duplicates.
    pub fn watchers_of(&self, watched: &ResourceId) -> Vec<ResourceId> {
        let mut watchers = self
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|registration| &registration.watched == watched)
            .map(|registration| registration.watcher.clone())
            .collect::<Vec<_>>();
        watchers.sort();
        watchers.dedup();
        watchers
    }

    pub fn names(&self) -> Vec<String> {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}
