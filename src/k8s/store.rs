//! Keyed object store backing the watch caches
//!
//! The same store type serves as the live per-kind cache maintained by the
//! watchers and as the tombstone cache filled by the controller on deletes.

use crate::k8s::types::TrackedObject;
use crate::Result;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Point lookup against a cache of tracked objects
pub trait ObjectCache: Send + Sync {
    /// Fetch an object by key. `Ok(None)` means the key is not cached.
    fn get_by_key(&self, key: &str) -> Result<Option<TrackedObject>>;
}

/// Change produced by applying a notification to the store
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Added(TrackedObject),
    Updated {
        old: TrackedObject,
        new: TrackedObject,
    },
    Deleted(TrackedObject),
}

/// Thread-safe map from object key to last-known object
#[derive(Clone, Default)]
pub struct ObjectStore {
    inner: Arc<DashMap<String, TrackedObject>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object under its own key
    pub fn add(&self, obj: TrackedObject) -> Delta {
        match self.inner.insert(obj.key(), obj.clone()) {
            Some(old) => Delta::Updated { old, new: obj },
            None => Delta::Added(obj),
        }
    }

    /// Remove a key, returning the object that was stored under it
    pub fn delete(&self, key: &str) -> Option<TrackedObject> {
        self.inner.remove(key).map(|(_, v)| v)
    }

    pub fn get(&self, key: &str) -> Option<TrackedObject> {
        self.inner.get(key).map(|r| r.clone())
    }

    /// Swap the whole content for a fresh listing.
    ///
    /// Objects missing from the listing come back as `Deleted` so callers
    /// can replay deletions they never saw.
    pub fn replace(&self, objects: Vec<TrackedObject>) -> Vec<Delta> {
        let fresh: HashMap<String, TrackedObject> =
            objects.into_iter().map(|o| (o.key(), o)).collect();

        let stale: Vec<String> = self
            .inner
            .iter()
            .filter(|r| !fresh.contains_key(r.key()))
            .map(|r| r.key().clone())
            .collect();

        let mut deltas: Vec<Delta> = stale
            .iter()
            .filter_map(|key| self.delete(key))
            .map(Delta::Deleted)
            .collect();

        let mut fresh: Vec<TrackedObject> = fresh.into_values().collect();
        fresh.sort_by_key(|o| o.key());
        deltas.extend(fresh.into_iter().map(|o| self.add(o)));

        deltas
    }

    /// All objects, sorted by key
    pub fn list(&self) -> Vec<TrackedObject> {
        let mut objects: Vec<TrackedObject> = self.inner.iter().map(|r| r.value().clone()).collect();
        objects.sort_by_key(|o| o.key());
        objects
    }

    /// Objects in one namespace, sorted by key
    pub fn list_namespace(&self, namespace: &str) -> Vec<TrackedObject> {
        let mut objects: Vec<TrackedObject> = self
            .inner
            .iter()
            .filter(|r| r.value().namespace() == Some(namespace))
            .map(|r| r.value().clone())
            .collect();
        objects.sort_by_key(|o| o.key());
        objects
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl ObjectCache for ObjectStore {
    fn get_by_key(&self, key: &str) -> Result<Option<TrackedObject>> {
        Ok(self.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::types::{NamespaceSnapshot, PvcSnapshot};

    fn pvc(namespace: &str, name: &str) -> TrackedObject {
        TrackedObject::PersistentVolumeClaim(PvcSnapshot {
            name: name.to_string(),
            namespace: namespace.to_string(),
            annotations: Default::default(),
        })
    }

    #[test]
    fn test_store_add_reports_add_then_update() {
        let store = ObjectStore::new();

        assert_eq!(store.add(pvc("ns1", "a")), Delta::Added(pvc("ns1", "a")));
        assert!(matches!(store.add(pvc("ns1", "a")), Delta::Updated { .. }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_by_key("ns1/a").unwrap(), Some(pvc("ns1", "a")));
        assert_eq!(store.get_by_key("ns1/b").unwrap(), None);
    }

    #[test]
    fn test_store_replace_emits_missed_deletes() {
        let store = ObjectStore::new();
        store.add(pvc("ns1", "gone"));
        store.add(pvc("ns1", "kept"));

        let deltas = store.replace(vec![pvc("ns1", "kept"), pvc("ns1", "new")]);

        assert_eq!(deltas[0], Delta::Deleted(pvc("ns1", "gone")));
        assert!(matches!(&deltas[1], Delta::Updated { new, .. } if new.key() == "ns1/kept"));
        assert_eq!(deltas[2], Delta::Added(pvc("ns1", "new")));
        assert_eq!(store.len(), 2);
        assert!(store.get("ns1/gone").is_none());
    }

    #[test]
    fn test_store_list_namespace() {
        let store = ObjectStore::new();
        store.add(pvc("ns1", "b"));
        store.add(pvc("ns1", "a"));
        store.add(pvc("ns2", "c"));
        store.add(TrackedObject::Namespace(NamespaceSnapshot {
            name: "ns1".to_string(),
        }));

        let keys: Vec<String> = store.list_namespace("ns1").iter().map(|o| o.key()).collect();
        assert_eq!(keys, vec!["ns1/a", "ns1/b"]);
        assert_eq!(store.list().len(), 4);
    }
}
