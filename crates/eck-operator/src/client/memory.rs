//! An in-memory [`ObjectStore`] mimicking the API server semantics the
//! controllers rely on: resource versions with optimistic concurrency, label
//! selection, finalizer-delayed deletion and owner-reference cascades.
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde_json::{Value, json};

use super::{Error, ObjectStore, ResourceId, Result, StoreObject};
use crate::kvp::matches_labels;

const DELETION_TIMESTAMP: &str = "2019-02-01T00:00:00Z";

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ResourceId, Value>,
    next_version: u64,
    next_uid: u64,
    writes: usize,
}

impl State {
    fn bump_version(&mut self, object: &mut Value) {
        self.next_version += 1;
        object["metadata"]["resourceVersion"] = json!(self.next_version.to_string());
    }

    fn stamp_new(&mut self, object: &mut Value) {
        if object["metadata"]["uid"].is_null() {
            self.next_uid += 1;
            object["metadata"]["uid"] = json!(format!("uid-{}", self.next_uid));
        }
        self.bump_version(object);
    }

    /// Stores `object` unless it is terminating without finalizers, in which
    /// case it goes away together with everything it owns.
    fn settle(&mut self, id: ResourceId, object: Value) {
        let terminating = !object["metadata"]["deletionTimestamp"].is_null();
        let finalizers_left = object["metadata"]["finalizers"]
            .as_array()
            .is_some_and(|finalizers| !finalizers.is_empty());

        if terminating && !finalizers_left {
            self.remove_cascading(&id);
        } else {
            self.objects.insert(id, object);
        }
    }

    fn remove_cascading(&mut self, id: &ResourceId) {
        let Some(removed) = self.objects.remove(id) else {
            return;
        };
        let Some(uid) = removed["metadata"]["uid"].as_str() else {
            return;
        };

        let dependents = self
            .objects
            .iter()
            .filter(|(_, object)| {
                object["metadata"]["ownerReferences"]
                    .as_array()
                    .is_some_and(|refs| refs.iter().any(|owner| owner["uid"] == uid))
            })
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        for dependent in dependents {
            self.remove_cascading(&dependent);
        }
    }
}

impl MemoryStore {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory store lock poisoned")
    }

    /// Seeds an object without counting it as a write.
    pub fn insert<K: StoreObject>(&self, object: K) -> K {
        let id = ResourceId::of(&object);
        let mut value = to_value(&id, &object);
        let mut state = self.state();
        state.stamp_new(&mut value);
        state.objects.insert(id.clone(), value.clone());
        from_value(&id, value)
    }

    /// Number of writes issued through the [`ObjectStore`] interface.
    pub fn writes(&self) -> usize {
        self.state().writes
    }

    pub fn all<K: StoreObject>(&self) -> Vec<K> {
        let kind = K::kind(&());
        self.state()
            .objects
            .iter()
            .filter(|(id, _)| id.kind == kind)
            .map(|(id, value)| from_value(id, value.clone()))
            .collect()
    }

    pub fn find<K: StoreObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let id = ResourceId::new::<K>(namespace, name);
        self.state()
            .objects
            .get(&id)
            .map(|value| from_value(&id, value.clone()))
    }
}

fn to_value<K: StoreObject>(id: &ResourceId, object: &K) -> Value {
    serde_json::to_value(object).unwrap_or_else(|err| panic!("failed to serialize {id}: {err}"))
}

fn from_value<K: StoreObject>(id: &ResourceId, value: Value) -> K {
    serde_json::from_value(value).unwrap_or_else(|err| panic!("failed to deserialize {id}: {err}"))
}

fn resource_version(value: &Value) -> Option<&str> {
    value["metadata"]["resourceVersion"].as_str()
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_opt<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.find(namespace, name))
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        labels: &std::collections::BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        Ok(self
            .all::<K>()
            .into_iter()
            .filter(|object| namespace.is_none_or(|ns| object.namespace().as_deref() == Some(ns)))
            .filter(|object| matches_labels(object.labels(), labels))
            .collect())
    }

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K> {
        let id = ResourceId::of(object);
        let mut state = self.state();
        if state.objects.contains_key(&id) {
            return Err(Error::Conflict { object: id });
        }

        let mut value = to_value(&id, object);
        value["metadata"]["resourceVersion"] = Value::Null;
        state.stamp_new(&mut value);
        state.writes += 1;
        state.objects.insert(id.clone(), value.clone());
        Ok(from_value(&id, value))
    }

    async fn replace<K: StoreObject>(&self, object: &K) -> Result<K> {
        let id = ResourceId::of(object);
        let mut state = self.state();
        let Some(stored) = state.objects.get(&id) else {
            return Err(Error::NotFound { object: id });
        };
        if object.meta().resource_version.as_deref() != resource_version(stored) {
            return Err(Error::Conflict { object: id });
        }

        let mut value = to_value(&id, object);
        value["metadata"]["uid"] = stored["metadata"]["uid"].clone();
        value["metadata"]["deletionTimestamp"] = stored["metadata"]["deletionTimestamp"].clone();
        value["status"] = stored["status"].clone();
        state.bump_version(&mut value);
        state.writes += 1;
        state.settle(id.clone(), value.clone());
        Ok(from_value(&id, value))
    }

    async fn merge_patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: Value,
    ) -> Result<K> {
        let id = ResourceId::new::<K>(namespace, name);
        let mut state = self.state();
        let Some(stored) = state.objects.get(&id) else {
            return Err(Error::NotFound { object: id });
        };
        if let Some(expected) = resource_version(&patch) {
            if Some(expected) != resource_version(stored) {
                return Err(Error::Conflict { object: id });
            }
        }

        let mut value = stored.clone();
        json_patch::merge(&mut value, &patch);
        state.bump_version(&mut value);
        state.writes += 1;
        state.settle(id.clone(), value.clone());
        Ok(from_value(&id, value))
    }

    async fn merge_patch_status<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        status: Value,
    ) -> Result<K> {
        self.merge_patch(namespace, name, json!({ "status": status }))
            .await
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<()> {
        let id = ResourceId::new::<K>(namespace, name);
        let mut state = self.state();
        let Some(stored) = state.objects.get(&id) else {
            return Err(Error::NotFound { object: id });
        };

        let mut value = stored.clone();
        value["metadata"]["deletionTimestamp"] = json!(DELETION_TIMESTAMP);
        state.writes += 1;
        state.settle(id, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use kube::core::ObjectMeta;

    use super::*;

    fn secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some("default".to_owned()),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        }
    }

    #[tokio::test]
    async fn stale_replace_conflicts() {
        let store = MemoryStore::default();
        let created = store.create(&secret("a")).await.unwrap();
        store.replace(&created).await.unwrap();

        let err = store.replace(&created).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn finalizers_delay_deletion() {
        let store = MemoryStore::default();
        let mut obj = secret("a");
        obj.metadata.finalizers = Some(vec!["test".to_owned()]);
        store.insert(obj);

        store.delete::<Secret>("default", "a").await.unwrap();
        let terminating = store.find::<Secret>("default", "a").unwrap();
        assert!(terminating.metadata.deletion_timestamp.is_some());

        store
            .merge_patch::<Secret>("default", "a", json!({"metadata": {"finalizers": []}}))
            .await
            .unwrap();
        assert!(store.find::<Secret>("default", "a").is_none());
    }

    #[tokio::test]
    async fn deletion_cascades_to_owned_objects() {
        let store = MemoryStore::default();
        let owner = store.insert(secret("owner"));
        let mut owned = ConfigMap {
            metadata: ObjectMeta {
                name: Some("owned".to_owned()),
                namespace: Some("default".to_owned()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        };
        owned.metadata.owner_references = owner.controller_owner_ref(&()).map(|r| vec![r]);
        store.insert(owned);

        store.delete::<Secret>("default", "owner").await.unwrap();
        assert!(store.all::<ConfigMap>().is_empty());
    }
}
