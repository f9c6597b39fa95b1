//! Cluster Sync
//!
//! kube watchers feeding the in-memory object store and, for the kinds the
//! ledger follows, the [`LedgerMaintainer`]. Every watcher runs as its own
//! task; a failing stream backs off and resumes without stopping the others.
//!
//! The ledger is only complete once every kind has delivered its initial
//! list. [`ClusterSync::wait_synced`] resolves at that point.

use crate::cache::{ChangePayload, ChangeType, LedgerMaintainer};
use crate::crd::{NodeLocalStorage, VolumeSnapshot, VolumeSnapshotContent};
use crate::domain::{InMemoryObjectStore, PodPatcher, StoredObject};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashSet;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Patch, PatchParams};
use kube::runtime::watcher::Event;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Watched Kinds
// =============================================================================

/// Object kinds mirrored from the API server
pub trait WatchedObject:
    StoredObject + Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
    /// Ledger notification carrying this object, if the ledger follows the kind
    fn payload(&self) -> Option<ChangePayload> {
        None
    }
}

impl WatchedObject for Node {
    fn payload(&self) -> Option<ChangePayload> {
        Some(ChangePayload::Node(self.clone()))
    }
}

impl WatchedObject for PersistentVolume {
    fn payload(&self) -> Option<ChangePayload> {
        Some(ChangePayload::PersistentVolume(self.clone()))
    }
}

impl WatchedObject for PersistentVolumeClaim {
    fn payload(&self) -> Option<ChangePayload> {
        Some(ChangePayload::PersistentVolumeClaim(self.clone()))
    }
}

impl WatchedObject for NodeLocalStorage {
    fn payload(&self) -> Option<ChangePayload> {
        Some(ChangePayload::NodeLocalStorage(self.clone()))
    }
}

impl WatchedObject for Pod {}
impl WatchedObject for StorageClass {}
impl WatchedObject for VolumeSnapshot {}
impl WatchedObject for VolumeSnapshotContent {}

// =============================================================================
// Cluster Sync
// =============================================================================

/// Number of kinds started by [`ClusterSync::spawn_watchers`]
pub const WATCHED_KINDS: usize = 8;

/// Applies watch events to the store, then to the ledger
pub struct ClusterSync {
    store: Arc<InMemoryObjectStore>,
    maintainer: Arc<LedgerMaintainer>,
    /// Kinds whose initial list has been applied
    listed: DashSet<String>,
    synced: watch::Sender<bool>,
}

impl ClusterSync {
    pub fn new(store: Arc<InMemoryObjectStore>, maintainer: Arc<LedgerMaintainer>) -> Arc<Self> {
        let (synced, _) = watch::channel(false);
        Arc::new(Self {
            store,
            maintainer,
            listed: DashSet::new(),
            synced,
        })
    }

    pub fn store(&self) -> &Arc<InMemoryObjectStore> {
        &self.store
    }

    /// Whether every watched kind has delivered its initial list
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Resolve once every watched kind has delivered its initial list
    pub async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    fn mark_listed(&self, kind: &str) {
        if !self.listed.insert(kind.to_string()) {
            return;
        }
        let listed = self.listed.len();
        debug!("Initial {} list applied ({}/{} kinds)", kind, listed, WATCHED_KINDS);
        if listed >= WATCHED_KINDS && !self.is_synced() {
            info!("All {} watched kinds synced", WATCHED_KINDS);
            self.synced.send_replace(true);
        }
    }

    /// Apply one watch event.
    ///
    /// The store is updated first so ledger handlers that consult it see the
    /// new object.
    pub fn apply_event<K: WatchedObject>(&self, event: Event<K>) {
        match event {
            Event::Applied(obj) => {
                let change = match self.store.upsert(obj.clone()) {
                    Some(_) => ChangeType::Update,
                    None => ChangeType::Add,
                };
                self.notify(change, &obj);
            }
            Event::Deleted(obj) => {
                self.store.remove(&obj);
                self.notify(ChangeType::Delete, &obj);
            }
            Event::Restarted(objects) => self.resync(objects),
        }
    }

    /// Replace a kind wholesale after a watch (re)start
    fn resync<K: WatchedObject>(&self, objects: Vec<K>) {
        let previous: Vec<Arc<K>> = K::table(&self.store)
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let changes: Vec<ChangeType> = objects
            .iter()
            .map(|obj| match self.store.get(obj) {
                Some(_) => ChangeType::Update,
                None => ChangeType::Add,
            })
            .collect();

        self.store.replace_all(objects.clone());
        debug!(
            "Resynced {} {} objects (previously {})",
            objects.len(),
            K::kind(&()),
            previous.len()
        );

        for gone in previous.iter().filter(|obj| self.store.get(obj.as_ref()).is_none()) {
            self.notify(ChangeType::Delete, gone.as_ref());
        }
        for (obj, change) in objects.iter().zip(changes) {
            self.notify(change, obj);
        }
        self.mark_listed(&K::kind(&()));
    }

    fn notify<K: WatchedObject>(&self, change: ChangeType, obj: &K) {
        if let Some(payload) = obj.payload() {
            self.maintainer.apply_or_skip(change, &payload);
        }
    }

    /// Start one watcher task per kind
    pub fn spawn_watchers(self: &Arc<Self>, client: Client, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_watcher::<Node>(client.clone(), cancel.clone()),
            self.spawn_watcher::<NodeLocalStorage>(client.clone(), cancel.clone()),
            self.spawn_watcher::<PersistentVolume>(client.clone(), cancel.clone()),
            self.spawn_watcher::<PersistentVolumeClaim>(client.clone(), cancel.clone()),
            self.spawn_watcher::<Pod>(client.clone(), cancel.clone()),
            self.spawn_watcher::<StorageClass>(client.clone(), cancel.clone()),
            self.spawn_watcher::<VolumeSnapshot>(client.clone(), cancel.clone()),
            self.spawn_watcher::<VolumeSnapshotContent>(client, cancel),
        ]
    }

    fn spawn_watcher<K: WatchedObject>(self: &Arc<Self>, client: Client, cancel: CancellationToken) -> JoinHandle<()> {
        let sync = Arc::clone(self);
        tokio::spawn(async move {
            let kind = K::kind(&()).to_string();
            let api: Api<K> = Api::all(client);
            let mut stream = watcher(api, watcher::Config::default())
                .default_backoff()
                .boxed();
            info!("Watching {}", kind);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = stream.next() => match next {
                        Some(Ok(event)) => sync.apply_event(event),
                        Some(Err(e)) => warn!("{} watch error: {}", kind, e),
                        None => break,
                    },
                }
            }
            info!("Stopped watching {}", kind);
        })
    }
}

// =============================================================================
// Pod Patcher
// =============================================================================

/// Merge-patches pod labels through the API server
pub struct KubePodPatcher {
    client: Client,
}

impl KubePodPatcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodPatcher for KubePodPatcher {
    async fn patch_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &[(String, String)],
    ) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let labels: BTreeMap<&str, &str> = labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let patch = serde_json::json!({ "metadata": { "labels": labels } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ClusterNodeCache;
    use crate::domain::{ObjectStore, VolumeKind};
    use crate::scheduler::testutil::*;
    use kube::api::ObjectMeta;
    use std::time::Duration;

    fn sync() -> Arc<ClusterSync> {
        let store = InMemoryObjectStore::new();
        let maintainer = Arc::new(LedgerMaintainer::new(ClusterNodeCache::new(64), store.clone()));
        ClusterSync::new(store, maintainer)
    }

    fn node(name: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_events_reach_store_and_ledger() {
        let sync = sync();
        let cache = sync.maintainer.cache().clone();

        sync.apply_event(Event::Applied(node_local_storage(
            "node-1",
            &[("share", 100 * GI)],
            &[],
            &[("/dev/sdb", 50 * GI)],
        )));
        sync.apply_event(Event::Applied(local_pv(
            "pv-d",
            "node-1",
            "d",
            &[("volumeType", "Device"), ("device", "/dev/sdb")],
            "50Gi",
        )));
        assert!(sync.store().persistent_volume("pv-d").is_some());
        assert_eq!(cache.read("node-1", |c| c.free_count(VolumeKind::Device)), Some(0));

        let pv = sync.store().persistent_volume("pv-d").unwrap();
        sync.apply_event(Event::Deleted(pv.as_ref().clone()));
        assert!(sync.store().persistent_volume("pv-d").is_none());
        assert_eq!(cache.read("node-1", |c| c.free_count(VolumeKind::Device)), Some(1));
    }

    #[test]
    fn test_store_only_kinds() {
        let sync = sync();
        sync.apply_event(Event::Applied(storage_class("open-local-lvm", "local.csi.aliyun.com", &[])));
        sync.apply_event(Event::Applied(pod("default", "app", &[])));
        assert!(sync.store().storage_class("open-local-lvm").is_some());
        assert!(sync.store().pod("default", "app").is_some());
        assert!(sync.maintainer.cache().is_empty());
    }

    #[test]
    fn test_restart_deletes_vanished_objects() {
        let sync = sync();
        let cache = sync.maintainer.cache().clone();
        sync.apply_event(Event::Applied(node("n1")));
        sync.apply_event(Event::Applied(node("n2")));
        assert_eq!(cache.len(), 2);

        sync.apply_event(Event::Restarted(vec![node("n2"), node("n3")]));
        assert_eq!(cache.node_names(), vec!["n2", "n3"]);
        assert!(sync.store().node("n1").is_none());
    }

    #[tokio::test]
    async fn test_synced_after_every_initial_list() {
        let sync = sync();
        sync.apply_event(Event::Applied(node("n1")));
        assert!(!sync.is_synced());

        sync.apply_event(Event::Restarted(vec![node("n1")]));
        sync.apply_event(Event::<NodeLocalStorage>::Restarted(vec![]));
        sync.apply_event(Event::<PersistentVolume>::Restarted(vec![]));
        sync.apply_event(Event::<PersistentVolumeClaim>::Restarted(vec![]));
        sync.apply_event(Event::<Pod>::Restarted(vec![]));
        sync.apply_event(Event::<StorageClass>::Restarted(vec![]));
        sync.apply_event(Event::<VolumeSnapshot>::Restarted(vec![]));
        // a relist of a kind already seen does not count again
        sync.apply_event(Event::Restarted(vec![node("n1")]));
        assert!(!sync.is_synced());

        let waiter = tokio::spawn({
            let sync = Arc::clone(&sync);
            async move { sync.wait_synced().await }
        });
        sync.apply_event(Event::<VolumeSnapshotContent>::Restarted(vec![]));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(sync.is_synced());

        // later callers return at once
        tokio::time::timeout(Duration::from_secs(1), sync.wait_synced())
            .await
            .unwrap();
    }
}
