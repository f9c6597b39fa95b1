//! Ledger Maintainer
//!
//! Single synchronous mutation entry point for the resource ledger. Change
//! notifications for Nodes, PersistentVolumes, PersistentVolumeClaims and
//! NodeLocalStorage objects are applied through [`LedgerMaintainer::apply_change`],
//! independently of how they were delivered.

use super::cluster_cache::ClusterNodeCache;
use super::events::LedgerEvent;
use super::metrics::LedgerMetrics;
use super::node_cache::NodeStorageCache;
use crate::crd::NodeLocalStorage;
use crate::domain::k8s::{
    is_local_pv, pv_capacity_bytes, pv_claim_key, pv_node_name, pvc_key, pvc_phase,
    pvc_requested_bytes, CLAIM_BOUND,
};
use crate::domain::{
    ObjectStore, PvcKey, VolumeKind, ATTR_DEVICE, ATTR_MOUNT_POINT, PARAM_VG_NAME,
    PARAM_VOLUME_TYPE,
};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// Change Types
// =============================================================================

/// Object kinds the ledger follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Node,
    PersistentVolume,
    PersistentVolumeClaim,
    NodeLocalStorage,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Node => write!(f, "Node"),
            ObjectKind::PersistentVolume => write!(f, "PersistentVolume"),
            ObjectKind::PersistentVolumeClaim => write!(f, "PersistentVolumeClaim"),
            ObjectKind::NodeLocalStorage => write!(f, "NodeLocalStorage"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Add,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Add => write!(f, "Add"),
            ChangeType::Update => write!(f, "Update"),
            ChangeType::Delete => write!(f, "Delete"),
        }
    }
}

/// Object carried by a change notification
#[derive(Debug, Clone)]
pub enum ChangePayload {
    Node(Node),
    PersistentVolume(PersistentVolume),
    PersistentVolumeClaim(PersistentVolumeClaim),
    NodeLocalStorage(NodeLocalStorage),
}

impl ChangePayload {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ChangePayload::Node(_) => ObjectKind::Node,
            ChangePayload::PersistentVolume(_) => ObjectKind::PersistentVolume,
            ChangePayload::PersistentVolumeClaim(_) => ObjectKind::PersistentVolumeClaim,
            ChangePayload::NodeLocalStorage(_) => ObjectKind::NodeLocalStorage,
        }
    }

    pub fn name(&self) -> String {
        match self {
            ChangePayload::Node(o) => o.name_any(),
            ChangePayload::PersistentVolume(o) => o.name_any(),
            ChangePayload::PersistentVolumeClaim(o) => pvc_key(o).to_string(),
            ChangePayload::NodeLocalStorage(o) => o.name_any(),
        }
    }
}

// =============================================================================
// Local PV Resolution
// =============================================================================

/// Ledger footprint of a local PV
#[derive(Debug, Clone, PartialEq)]
enum PvFootprint {
    Volume { vg: String, size_bytes: u64 },
    Exclusive { kind: VolumeKind, resource: String },
}

fn pv_footprint(pv: &PersistentVolume) -> Result<PvFootprint> {
    let spec = pv
        .spec
        .as_ref()
        .ok_or_else(|| Error::MalformedEvent(format!("pv {} has no spec", pv.name_any())))?;

    if let Some(local) = &spec.local {
        return Ok(PvFootprint::Exclusive {
            kind: VolumeKind::MountPoint,
            resource: local.path.clone(),
        });
    }

    let attributes = spec
        .csi
        .as_ref()
        .and_then(|csi| csi.volume_attributes.as_ref())
        .ok_or_else(|| {
            Error::MalformedEvent(format!("pv {} has no volume attributes", pv.name_any()))
        })?;

    let kind = VolumeKind::from_param(
        &pv.name_any(),
        attributes.get(PARAM_VOLUME_TYPE).map(String::as_str),
    )
    .map_err(|e| Error::MalformedEvent(e.to_string()))?;

    let attribute = |key: &str| {
        attributes.get(key).cloned().ok_or_else(|| {
            Error::MalformedEvent(format!("pv {} has no {} attribute", pv.name_any(), key))
        })
    };

    match kind {
        VolumeKind::Lvm => Ok(PvFootprint::Volume {
            vg: attribute(PARAM_VG_NAME)?,
            size_bytes: pv_capacity_bytes(pv)
                .map_err(|e| Error::MalformedEvent(e.to_string()))?,
        }),
        VolumeKind::MountPoint => Ok(PvFootprint::Exclusive {
            kind,
            resource: attribute(ATTR_MOUNT_POINT)?,
        }),
        VolumeKind::Device => Ok(PvFootprint::Exclusive {
            kind,
            resource: attribute(ATTR_DEVICE)?,
        }),
    }
}

// =============================================================================
// Ledger Maintainer
// =============================================================================

/// Applies object change notifications to the cluster ledger
pub struct LedgerMaintainer {
    cache: Arc<ClusterNodeCache>,
    store: Arc<dyn ObjectStore>,
    metrics: Option<Arc<LedgerMetrics>>,
}

impl LedgerMaintainer {
    pub fn new(cache: Arc<ClusterNodeCache>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            cache,
            store,
            metrics: None,
        }
    }

    /// Refresh capacity gauges after every mutation
    pub fn with_metrics(mut self, metrics: Arc<LedgerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &Arc<ClusterNodeCache> {
        &self.cache
    }

    /// Apply one change notification.
    ///
    /// Errors are local to the event; callers log them and continue.
    pub fn apply_change(&self, kind: ObjectKind, change: ChangeType, payload: &ChangePayload) -> Result<()> {
        if payload.kind() != kind {
            return Err(Error::MalformedEvent(format!(
                "{} change carries a {} payload",
                kind,
                payload.kind()
            )));
        }

        let result = match payload {
            ChangePayload::Node(node) => self.on_node(change, node),
            ChangePayload::PersistentVolume(pv) => self.on_pv(change, pv),
            ChangePayload::PersistentVolumeClaim(pvc) => self.on_pvc(change, pvc),
            ChangePayload::NodeLocalStorage(nls) => self.on_node_local_storage(change, nls),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_change(&kind.to_string(), &change.to_string(), result.is_ok());
        }
        result
    }

    /// Apply a change, logging and swallowing its error
    pub fn apply_or_skip(&self, change: ChangeType, payload: &ChangePayload) -> bool {
        match self.apply_change(payload.kind(), change, payload) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Skipping {} {} of {}: {}",
                    payload.kind(),
                    change,
                    payload.name(),
                    e
                );
                false
            }
        }
    }

    fn observe(&self, cache: &NodeStorageCache) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_node(cache);
        }
    }

    // =========================================================================
    // Node
    // =========================================================================

    fn on_node(&self, change: ChangeType, node: &Node) -> Result<()> {
        let name = node.name_any();
        match change {
            ChangeType::Add | ChangeType::Update => {
                self.cache.ensure_node(&name);
            }
            ChangeType::Delete => self.remove_node(&name),
        }
        Ok(())
    }

    fn remove_node(&self, name: &str) {
        if let Some(removed) = self.cache.remove_node(name) {
            info!("Removed ledger of node {}", name);
            if let Some(metrics) = &self.metrics {
                metrics.forget_node(&removed);
            }
        }
    }

    // =========================================================================
    // NodeLocalStorage
    // =========================================================================

    fn on_node_local_storage(&self, change: ChangeType, nls: &NodeLocalStorage) -> Result<()> {
        let node = nls.node_name();
        if node.is_empty() {
            return Err(Error::MalformedEvent(format!(
                "NodeLocalStorage {} names no node",
                nls.name_any()
            )));
        }

        if change == ChangeType::Delete {
            self.remove_node(&node);
            return Ok(());
        }

        let Some(status) = &nls.status else {
            debug!("NodeLocalStorage {} has no status yet", nls.name_any());
            self.cache.ensure_node(&node);
            return Ok(());
        };

        let handle = self.cache.ensure_node(&node);
        let summary = {
            let mut cache = handle.write();
            cache.apply_inventory(status);
            (
                cache.volume_groups.len(),
                cache.mount_points.len(),
                cache.devices.len(),
            )
        };
        self.cache.emit(LedgerEvent::InventoryUpdated {
            node: node.clone(),
            volume_groups: summary.0,
            mount_points: summary.1,
            devices: summary.2,
        });
        debug!(
            "Inventory of {}: {} volume groups, {} mount points, {} devices",
            node, summary.0, summary.1, summary.2
        );

        self.replay_volumes(&node);
        self.observe(&handle.read());
        Ok(())
    }

    /// Record the local PVs of a node already known to the store.
    ///
    /// PV notifications may arrive before the node's inventory does; the
    /// allocations they describe are picked up here.
    fn replay_volumes(&self, node: &str) {
        for pv in self.store.persistent_volumes() {
            if !is_local_pv(&pv) || pv_node_name(&pv).as_deref() != Some(node) {
                continue;
            }
            if let Err(e) = self.on_pv(ChangeType::Add, &pv) {
                warn!("Failed to replay pv {} on {}: {}", pv.name_any(), node, e);
            }
        }
    }

    // =========================================================================
    // PersistentVolume
    // =========================================================================

    fn on_pv(&self, change: ChangeType, pv: &PersistentVolume) -> Result<()> {
        if !is_local_pv(pv) {
            return Ok(());
        }
        let node = pv_node_name(pv).ok_or_else(|| {
            Error::MalformedEvent(format!("local pv {} has no node affinity", pv.name_any()))
        })?;
        let Some(pvc) = pv_claim_key(pv) else {
            debug!("pv {} is not claimed, nothing to record", pv.name_any());
            return Ok(());
        };
        let footprint = pv_footprint(pv)?;

        let handle = match change {
            ChangeType::Delete => match self.cache.get(&node) {
                Some(handle) => handle,
                None => return Ok(()),
            },
            _ => self
                .cache
                .get(&node)
                .ok_or_else(|| Error::NodeCacheNotFound { node: node.clone() })?,
        };

        let event = {
            let mut cache = handle.write();
            let event = match (change, footprint) {
                (ChangeType::Delete, PvFootprint::Volume { .. }) => cache
                    .release_volume(&pvc)
                    .map(|(volume_group, size_bytes)| LedgerEvent::VolumeReleased {
                        node: node.clone(),
                        volume_group,
                        pvc,
                        size_bytes,
                    }),
                (ChangeType::Delete, PvFootprint::Exclusive { kind, .. }) => cache
                    .release_exclusive(kind, &pvc)
                    .map(|resource| LedgerEvent::ResourceReleased {
                        node: node.clone(),
                        kind,
                        resource,
                        pvc,
                    }),
                (_, PvFootprint::Volume { vg, size_bytes }) => {
                    cache.allocate_volume(&vg, &pvc, size_bytes)?;
                    Some(LedgerEvent::VolumeAllocated {
                        node: node.clone(),
                        volume_group: vg,
                        pvc,
                        size_bytes,
                    })
                }
                (_, PvFootprint::Exclusive { kind, resource }) => {
                    cache.bind_exclusive(kind, &resource, &pvc)?;
                    Some(LedgerEvent::ResourceBound {
                        node: node.clone(),
                        kind,
                        resource,
                        pvc,
                    })
                }
            };
            self.observe(&cache);
            event
        };

        if let Some(event) = event {
            debug!("Ledger change on {}: {:?}", node, event);
            self.cache.emit(event);
        }
        Ok(())
    }

    // =========================================================================
    // PersistentVolumeClaim
    // =========================================================================

    fn on_pvc(&self, change: ChangeType, pvc: &PersistentVolumeClaim) -> Result<()> {
        let key = pvc_key(pvc);
        match change {
            ChangeType::Add => Ok(()),
            ChangeType::Update => self.on_pvc_resize(pvc, &key),
            ChangeType::Delete => {
                self.release_everywhere(&key);
                Ok(())
            }
        }
    }

    /// Grow the logical volume of a bound PVC that was expanded
    fn on_pvc_resize(&self, pvc: &PersistentVolumeClaim, key: &PvcKey) -> Result<()> {
        if pvc_phase(pvc) != CLAIM_BOUND {
            return Ok(());
        }
        let requested = pvc_requested_bytes(pvc).map_err(|e| Error::MalformedEvent(e.to_string()))?;

        for node in self.cache.node_names() {
            let Some(handle) = self.cache.get(&node) else {
                continue;
            };
            let mut cache = handle.write();
            let Some((vg, current)) = cache.volume_of(key).map(|(vg, size)| (vg.to_string(), size)) else {
                continue;
            };
            if requested <= current {
                return Ok(());
            }
            cache.allocate_volume(&vg, key, requested)?;
            info!(
                "Expanded {} on {}/{} from {} to {} bytes",
                key, node, vg, current, requested
            );
            self.observe(&cache);
            drop(cache);
            self.cache.emit(LedgerEvent::VolumeAllocated {
                node,
                volume_group: vg,
                pvc: key.clone(),
                size_bytes: requested,
            });
            return Ok(());
        }
        Ok(())
    }

    fn release_everywhere(&self, key: &PvcKey) {
        for node in self.cache.node_names() {
            let Some(handle) = self.cache.get(&node) else {
                continue;
            };
            let mut cache = handle.write();
            let mut events = Vec::new();
            if let Some((volume_group, size_bytes)) = cache.release_volume(key) {
                events.push(LedgerEvent::VolumeReleased {
                    node: node.clone(),
                    volume_group,
                    pvc: key.clone(),
                    size_bytes,
                });
            }
            for kind in [VolumeKind::MountPoint, VolumeKind::Device] {
                if let Some(resource) = cache.release_exclusive(kind, key) {
                    events.push(LedgerEvent::ResourceReleased {
                        node: node.clone(),
                        kind,
                        resource,
                        pvc: key.clone(),
                    });
                }
            }
            if events.is_empty() {
                continue;
            }
            self.observe(&cache);
            drop(cache);
            for event in events {
                self.cache.emit(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::node_cache::ExclusiveResource;
    use crate::domain::InMemoryObjectStore;
    use crate::scheduler::testutil::{local_pv, node_local_storage, GI};
    use assert_matches::assert_matches;
    use kube::api::ObjectMeta;

    fn maintainer() -> LedgerMaintainer {
        let cache = ClusterNodeCache::new(64);
        cache.insert(
            NodeStorageCache::new("node-1")
                .with_volume_group("share", 100 * GI)
                .with_device(ExclusiveResource::new("/dev/sdb", 50 * GI)),
        );
        LedgerMaintainer::new(cache, InMemoryObjectStore::new())
    }

    #[test]
    fn test_lvm_pv_lifecycle() {
        let m = maintainer();
        let mut events = m.cache().subscribe();
        let pv = local_pv("pv-a", "node-1", "a", &[("volumeType", "LVM"), ("vgName", "share")], "30Gi");
        let payload = ChangePayload::PersistentVolume(pv);

        m.apply_change(ObjectKind::PersistentVolume, ChangeType::Add, &payload).unwrap();
        assert_eq!(
            m.cache().read("node-1", |c| c.volume_groups["share"].allocated_bytes),
            Some(30 * GI)
        );
        assert_matches!(events.try_recv(), Ok(LedgerEvent::VolumeAllocated { size_bytes, .. }) if size_bytes == 30 * GI);

        // replayed add is idempotent
        m.apply_change(ObjectKind::PersistentVolume, ChangeType::Update, &payload).unwrap();
        assert_eq!(
            m.cache().read("node-1", |c| c.volume_groups["share"].allocated_bytes),
            Some(30 * GI)
        );

        m.apply_change(ObjectKind::PersistentVolume, ChangeType::Delete, &payload).unwrap();
        assert_eq!(
            m.cache().read("node-1", |c| c.volume_groups["share"].allocated_bytes),
            Some(0)
        );
    }

    #[test]
    fn test_device_pv_binding() {
        let m = maintainer();
        let pv = local_pv("pv-d", "node-1", "d", &[("volumeType", "Device"), ("device", "/dev/sdb")], "50Gi");
        m.apply_change(ObjectKind::PersistentVolume, ChangeType::Add, &ChangePayload::PersistentVolume(pv))
            .unwrap();
        assert_eq!(m.cache().read("node-1", |c| c.free_count(VolumeKind::Device)), Some(0));

        let other = local_pv("pv-e", "node-1", "e", &[("volumeType", "Device"), ("device", "/dev/sdb")], "50Gi");
        let result = m.apply_change(
            ObjectKind::PersistentVolume,
            ChangeType::Add,
            &ChangePayload::PersistentVolume(other),
        );
        assert_matches!(result, Err(Error::DoubleBinding { .. }));
    }

    #[test]
    fn test_pvc_delete_releases_everything() {
        let m = maintainer();
        let pv = local_pv("pv-d", "node-1", "d", &[("volumeType", "Device"), ("device", "/dev/sdb")], "50Gi");
        m.apply_change(ObjectKind::PersistentVolume, ChangeType::Add, &ChangePayload::PersistentVolume(pv))
            .unwrap();

        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                namespace: Some("default".into()),
                name: Some("d".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        m.apply_change(
            ObjectKind::PersistentVolumeClaim,
            ChangeType::Delete,
            &ChangePayload::PersistentVolumeClaim(pvc),
        )
        .unwrap();
        assert_eq!(m.cache().read("node-1", |c| c.free_count(VolumeKind::Device)), Some(1));
    }

    #[test]
    fn test_malformed_events_are_skipped() {
        let m = maintainer();
        let pv = local_pv("pv-x", "node-1", "x", &[("volumeType", "Tape")], "1Gi");
        let payload = ChangePayload::PersistentVolume(pv);
        assert_matches!(
            m.apply_change(ObjectKind::PersistentVolume, ChangeType::Add, &payload),
            Err(Error::MalformedEvent(_))
        );
        assert!(!m.apply_or_skip(ChangeType::Add, &payload));

        // kind / payload mismatch
        assert_matches!(
            m.apply_change(ObjectKind::Node, ChangeType::Add, &payload),
            Err(Error::MalformedEvent(_))
        );
    }

    #[test]
    fn test_node_join_and_leave() {
        let m = maintainer();
        let node = Node {
            metadata: ObjectMeta {
                name: Some("node-2".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let payload = ChangePayload::Node(node);
        m.apply_change(ObjectKind::Node, ChangeType::Add, &payload).unwrap();
        assert!(m.cache().contains("node-2"));
        m.apply_change(ObjectKind::Node, ChangeType::Delete, &payload).unwrap();
        assert!(!m.cache().contains("node-2"));
    }

    #[test]
    fn test_inventory_replays_earlier_volumes() {
        let store = InMemoryObjectStore::new();
        let m = LedgerMaintainer::new(ClusterNodeCache::new(64), store.clone());

        // the pv is seen before the node reports its inventory
        let pv = local_pv("pv-a", "node-7", "a", &[("volumeType", "LVM"), ("vgName", "share")], "30Gi");
        store.upsert(pv.clone());
        assert!(!m.apply_or_skip(ChangeType::Add, &ChangePayload::PersistentVolume(pv)));

        let nls = node_local_storage("node-7", &[("share", 100 * GI)], &[("/mnt/a", 10 * GI)], &[]);
        m.apply_change(
            ObjectKind::NodeLocalStorage,
            ChangeType::Add,
            &ChangePayload::NodeLocalStorage(nls.clone()),
        )
        .unwrap();
        assert_eq!(m.cache().read("node-7", |c| c.lvm_free_bytes()), Some(70 * GI));
        assert_eq!(m.cache().read("node-7", |c| c.free_count(VolumeKind::MountPoint)), Some(1));

        m.apply_change(
            ObjectKind::NodeLocalStorage,
            ChangeType::Delete,
            &ChangePayload::NodeLocalStorage(nls),
        )
        .unwrap();
        assert!(!m.cache().contains("node-7"));
    }
}
