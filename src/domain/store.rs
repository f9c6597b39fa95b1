//! In-Memory Object Store
//!
//! Concurrent object cache backed by DashMap, filled by the watchers in
//! `sync` and by tests. Implements [`ObjectStore`].

use super::ports::ObjectStore;
use crate::crd::{NodeLocalStorage, VolumeSnapshot, VolumeSnapshotContent};
use dashmap::DashMap;
use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::ResourceExt;
use std::sync::Arc;

fn namespaced_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

fn object_key<K: ResourceExt>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => namespaced_key(&ns, &obj.name_any()),
        None => obj.name_any(),
    }
}

/// One DashMap per object kind
#[derive(Default)]
pub struct InMemoryObjectStore {
    nodes: DashMap<String, Arc<Node>>,
    pods: DashMap<String, Arc<Pod>>,
    pvs: DashMap<String, Arc<PersistentVolume>>,
    pvcs: DashMap<String, Arc<PersistentVolumeClaim>>,
    storage_classes: DashMap<String, Arc<StorageClass>>,
    snapshots: DashMap<String, Arc<VolumeSnapshot>>,
    snapshot_contents: DashMap<String, Arc<VolumeSnapshotContent>>,
    node_local_storages: DashMap<String, Arc<NodeLocalStorage>>,
}

/// Object kinds the store can hold
pub trait StoredObject: ResourceExt + Sized {
    fn table(store: &InMemoryObjectStore) -> &DashMap<String, Arc<Self>>;
}

macro_rules! stored_object {
    ($ty:ty, $field:ident) => {
        impl StoredObject for $ty {
            fn table(store: &InMemoryObjectStore) -> &DashMap<String, Arc<Self>> {
                &store.$field
            }
        }
    };
}

stored_object!(Node, nodes);
stored_object!(Pod, pods);
stored_object!(PersistentVolume, pvs);
stored_object!(PersistentVolumeClaim, pvcs);
stored_object!(StorageClass, storage_classes);
stored_object!(VolumeSnapshot, snapshots);
stored_object!(VolumeSnapshotContent, snapshot_contents);
stored_object!(NodeLocalStorage, node_local_storages);

impl InMemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert or replace an object, returning the previous version
    pub fn upsert<K: StoredObject>(&self, obj: K) -> Option<Arc<K>> {
        K::table(self).insert(object_key(&obj), Arc::new(obj))
    }

    /// Remove an object, returning it if it was present
    pub fn remove<K: StoredObject>(&self, obj: &K) -> Option<Arc<K>> {
        K::table(self).remove(&object_key(obj)).map(|(_, v)| v)
    }

    /// Look up the stored version of an object
    pub fn get<K: StoredObject>(&self, obj: &K) -> Option<Arc<K>> {
        K::table(self).get(&object_key(obj)).map(|e| e.value().clone())
    }

    /// Replace every object of a kind (after a watch restart)
    pub fn replace_all<K: StoredObject>(&self, objects: Vec<K>) {
        let table = K::table(self);
        table.clear();
        for obj in objects {
            table.insert(object_key(&obj), Arc::new(obj));
        }
    }

    /// Number of objects of a kind
    pub fn len_of<K: StoredObject>(&self) -> usize {
        K::table(self).len()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.get(name).map(|e| e.value().clone())
    }

    fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().map(|e| e.value().clone()).collect()
    }

    fn pod(&self, namespace: &str, name: &str) -> Option<Arc<Pod>> {
        self.pods
            .get(&namespaced_key(namespace, name))
            .map(|e| e.value().clone())
    }

    fn pods(&self) -> Vec<Arc<Pod>> {
        self.pods.iter().map(|e| e.value().clone()).collect()
    }

    fn persistent_volume(&self, name: &str) -> Option<Arc<PersistentVolume>> {
        self.pvs.get(name).map(|e| e.value().clone())
    }

    fn persistent_volumes(&self) -> Vec<Arc<PersistentVolume>> {
        self.pvs.iter().map(|e| e.value().clone()).collect()
    }

    fn persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<Arc<PersistentVolumeClaim>> {
        self.pvcs
            .get(&namespaced_key(namespace, name))
            .map(|e| e.value().clone())
    }

    fn storage_class(&self, name: &str) -> Option<Arc<StorageClass>> {
        self.storage_classes.get(name).map(|e| e.value().clone())
    }

    fn volume_snapshot(&self, namespace: &str, name: &str) -> Option<Arc<VolumeSnapshot>> {
        self.snapshots
            .get(&namespaced_key(namespace, name))
            .map(|e| e.value().clone())
    }

    fn volume_snapshot_content(&self, name: &str) -> Option<Arc<VolumeSnapshotContent>> {
        self.snapshot_contents.get(name).map(|e| e.value().clone())
    }

    fn node_local_storage(&self, name: &str) -> Option<Arc<NodeLocalStorage>> {
        self.node_local_storages.get(name).map(|e| e.value().clone())
    }

    fn node_local_storages(&self) -> Vec<Arc<NodeLocalStorage>> {
        self.node_local_storages
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }
}
