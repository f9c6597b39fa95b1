//! PVC Classifier
//!
//! Partitions the PVCs a pod mounts by the local resource kind backing them,
//! resolving each claim's storage class through the object store.

use crate::domain::k8s::{pod_claim_names, pod_key, pvc_key, pvc_phase, pvc_requested_bytes, pvc_storage_class, CLAIM_BOUND};
use crate::domain::{
    ObjectStore, PvcKey, VolumeKind, LOCAL_PROVISIONER, PARAM_MEDIA_TYPE, PARAM_READONLY,
    PARAM_VG_NAME, PARAM_VOLUME_TYPE,
};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::trace;

/// Data source kind of snapshot-restored claims
const SNAPSHOT_KIND: &str = "VolumeSnapshot";

/// One local PVC of a pod, with the storage class parameters it carries
#[derive(Debug, Clone)]
pub struct PvcRequest {
    pub key: PvcKey,
    pub kind: VolumeKind,
    pub size_bytes: u64,
    /// Volume group pinned by the storage class
    pub vg_name: Option<String>,
    /// Media type exclusive resources must match
    pub media_type: Option<String>,
    /// Read-only claim restored from a snapshot
    pub snapshot: bool,
    pub claim: Arc<PersistentVolumeClaim>,
}

/// Local PVCs of a pod, by kind
#[derive(Debug, Clone, Default)]
pub struct PodPvcs {
    pub lvm: Vec<PvcRequest>,
    pub mount_points: Vec<PvcRequest>,
    pub devices: Vec<PvcRequest>,
}

impl PodPvcs {
    pub fn is_empty(&self) -> bool {
        self.lvm.is_empty() && self.mount_points.is_empty() && self.devices.is_empty()
    }

    /// Exclusive PVCs of a kind
    pub fn of_kind(&self, kind: VolumeKind) -> &[PvcRequest] {
        match kind {
            VolumeKind::Lvm => &self.lvm,
            VolumeKind::MountPoint => &self.mount_points,
            VolumeKind::Device => &self.devices,
        }
    }

    /// Snapshot claims among the LVM claims
    pub fn snapshots(&self) -> impl Iterator<Item = &PvcRequest> {
        self.lvm.iter().filter(|r| r.snapshot)
    }

    pub fn has_snapshots(&self) -> bool {
        self.snapshots().next().is_some()
    }

    /// Every claim, LVM first
    pub fn iter(&self) -> impl Iterator<Item = &PvcRequest> {
        self.lvm
            .iter()
            .chain(self.mount_points.iter())
            .chain(self.devices.iter())
    }

    pub fn len(&self) -> usize {
        self.lvm.len() + self.mount_points.len() + self.devices.len()
    }
}

/// Classify the local PVCs of a pod.
///
/// `skip_bound` leaves out claims already bound (their consumption is in the
/// ledger); `include_snapshots` adds read-only snapshot claims to the LVM list.
pub fn classify(
    pod: &Pod,
    store: &dyn ObjectStore,
    skip_bound: bool,
    include_snapshots: bool,
) -> Result<PodPvcs> {
    let namespace = pod.namespace().unwrap_or_default();
    let mut result = PodPvcs::default();

    for claim_name in pod_claim_names(pod) {
        let pvc = store
            .persistent_volume_claim(&namespace, &claim_name)
            .ok_or_else(|| {
                Error::resolution(
                    "PersistentVolumeClaim",
                    format!("{}/{}", namespace, claim_name),
                    format!("referenced by pod {} but not found", pod_key(pod)),
                )
            })?;

        let Some(request) = classify_claim(pvc, store)? else {
            continue;
        };
        if skip_bound && pvc_phase(&request.claim) == CLAIM_BOUND {
            trace!("Skipping bound claim {}", request.key);
            continue;
        }
        if request.snapshot && !include_snapshots {
            continue;
        }

        match request.kind {
            VolumeKind::Lvm => result.lvm.push(request),
            VolumeKind::MountPoint => result.mount_points.push(request),
            VolumeKind::Device => result.devices.push(request),
        }
    }

    Ok(result)
}

/// Resolve one claim, `None` when it is not backed by local storage
pub fn classify_claim(
    pvc: Arc<PersistentVolumeClaim>,
    store: &dyn ObjectStore,
) -> Result<Option<PvcRequest>> {
    let key = pvc_key(&pvc);
    let Some(class_name) = pvc_storage_class(&pvc) else {
        return Ok(None);
    };
    let class = store.storage_class(class_name).ok_or_else(|| {
        Error::resolution("StorageClass", class_name, format!("requested by {}", key))
    })?;
    if class.provisioner != LOCAL_PROVISIONER {
        return Ok(None);
    }

    let param = |name: &str| {
        class
            .parameters
            .as_ref()
            .and_then(|p| p.get(name))
            .map(String::as_str)
    };

    let snapshot = is_snapshot_claim(&pvc) && param(PARAM_READONLY) == Some("true");
    let kind = if snapshot {
        VolumeKind::Lvm
    } else {
        VolumeKind::from_param(class_name, param(PARAM_VOLUME_TYPE))?
    };
    let size_bytes = pvc_requested_bytes(&pvc)?;

    Ok(Some(PvcRequest {
        key,
        kind,
        size_bytes,
        vg_name: param(PARAM_VG_NAME).filter(|v| !v.is_empty()).map(str::to_string),
        media_type: param(PARAM_MEDIA_TYPE).filter(|v| !v.is_empty()).map(str::to_string),
        snapshot,
        claim: pvc,
    }))
}

fn is_snapshot_claim(pvc: &PersistentVolumeClaim) -> bool {
    pvc.spec
        .as_ref()
        .and_then(|s| s.data_source.as_ref())
        .is_some_and(|ds| ds.kind == SNAPSHOT_KIND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InMemoryObjectStore;
    use crate::scheduler::testutil::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_classify_by_kind() {
        let store = InMemoryObjectStore::new();
        install_classes(&store);
        store.upsert(pvc("default", "data", "open-local-lvm", "10Gi"));
        store.upsert(pvc("default", "logs", "open-local-mountpoint-hdd", "20Gi"));
        store.upsert(pvc("default", "raw", "open-local-device-ssd", "30Gi"));
        store.upsert(pvc("default", "remote", "nfs", "5Gi"));
        let app = pod("default", "app", &["data", "logs", "raw", "remote"]);

        let pvcs = classify(&app, store.as_ref(), true, false).unwrap();
        assert_eq!(pvcs.lvm.len(), 1);
        assert_eq!(pvcs.mount_points.len(), 1);
        assert_eq!(pvcs.devices.len(), 1);
        assert_eq!(pvcs.mount_points[0].media_type.as_deref(), Some("hdd"));
        assert_eq!(pvcs.lvm[0].size_bytes, 10 * GI);
    }

    #[test]
    fn test_snapshots_only_when_requested() {
        let store = InMemoryObjectStore::new();
        install_classes(&store);
        store.upsert(snapshot_pvc("default", "restore", "snap-1", "10Gi"));
        let app = pod("default", "app", &["restore"]);

        let without = classify(&app, store.as_ref(), true, false).unwrap();
        assert!(without.is_empty());

        let with = classify(&app, store.as_ref(), true, true).unwrap();
        assert_eq!(with.lvm.len(), 1);
        assert!(with.has_snapshots());
    }

    #[test]
    fn test_bound_claims_skipped() {
        let store = InMemoryObjectStore::new();
        install_classes(&store);
        store.upsert(bound(pvc("default", "data", "open-local-lvm", "10Gi")));
        let app = pod("default", "app", &["data"]);

        assert!(classify(&app, store.as_ref(), true, false).unwrap().is_empty());
        assert_eq!(classify(&app, store.as_ref(), false, false).unwrap().lvm.len(), 1);
    }

    #[test]
    fn test_resolution_errors() {
        let store = InMemoryObjectStore::new();
        install_classes(&store);
        let app = pod("default", "app", &["missing"]);
        assert_matches!(
            classify(&app, store.as_ref(), true, false),
            Err(Error::Resolution { kind, .. }) if kind == "PersistentVolumeClaim"
        );

        store.upsert(pvc("default", "odd", "open-local-unknown", "1Gi"));
        let app = pod("default", "app", &["odd"]);
        assert_matches!(
            classify(&app, store.as_ref(), true, false),
            Err(Error::UnknownKind { .. })
        );

        store.upsert(pvc("default", "ghost", "no-such-class", "1Gi"));
        let app = pod("default", "app", &["ghost"]);
        assert_matches!(
            classify(&app, store.as_ref(), true, false),
            Err(Error::Resolution { kind, .. }) if kind == "StorageClass"
        );
    }
}
