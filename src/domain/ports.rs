//! Domain Ports - trait boundaries towards the cluster
//!
//! The scheduling core never talks to the API server directly. It reads a
//! local, eventually consistent object store and asks a patcher to touch
//! pods. Adapters implement these traits.

use crate::crd::{NodeLocalStorage, VolumeSnapshot, VolumeSnapshotContent};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use std::sync::Arc;

// =============================================================================
// Object Store
// =============================================================================

/// Read-only view of cluster objects, fed by informers.
///
/// Lookups are in-memory and never block on the network.
pub trait ObjectStore: Send + Sync {
    fn node(&self, name: &str) -> Option<Arc<Node>>;

    fn nodes(&self) -> Vec<Arc<Node>>;

    fn pod(&self, namespace: &str, name: &str) -> Option<Arc<Pod>>;

    fn pods(&self) -> Vec<Arc<Pod>>;

    fn persistent_volume(&self, name: &str) -> Option<Arc<PersistentVolume>>;

    fn persistent_volumes(&self) -> Vec<Arc<PersistentVolume>>;

    fn persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<Arc<PersistentVolumeClaim>>;

    fn storage_class(&self, name: &str) -> Option<Arc<StorageClass>>;

    fn volume_snapshot(&self, namespace: &str, name: &str) -> Option<Arc<VolumeSnapshot>>;

    fn volume_snapshot_content(&self, name: &str) -> Option<Arc<VolumeSnapshotContent>>;

    fn node_local_storage(&self, name: &str) -> Option<Arc<NodeLocalStorage>>;

    fn node_local_storages(&self) -> Vec<Arc<NodeLocalStorage>>;
}

// =============================================================================
// Pod Patcher
// =============================================================================

/// Writes labels onto pods (used to re-trigger scheduling)
#[async_trait]
pub trait PodPatcher: Send + Sync {
    async fn patch_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &[(String, String)],
    ) -> Result<()>;
}
