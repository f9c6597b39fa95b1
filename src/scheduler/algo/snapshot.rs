//! Snapshot colocation
//!
//! A read-only snapshot claim can only be served on the node holding the
//! logical volume the snapshot was taken from. The source is found by
//! following claim → VolumeSnapshot → VolumeSnapshotContent → PV → node.

use crate::domain::k8s::pv_node_name;
use crate::domain::ObjectStore;
use crate::error::{Error, Result};
use crate::scheduler::classifier::PvcRequest;
use std::collections::BTreeSet;
use tracing::debug;

/// Node holding the source volume of a snapshot claim
pub fn snapshot_source_node(pvc: &PvcRequest, store: &dyn ObjectStore) -> Result<String> {
    let snapshot_name = pvc
        .claim
        .spec
        .as_ref()
        .and_then(|s| s.data_source.as_ref())
        .map(|ds| ds.name.clone())
        .ok_or_else(|| {
            Error::resolution("VolumeSnapshot", pvc.key.to_string(), "claim has no data source")
        })?;

    let snapshot = store
        .volume_snapshot(&pvc.key.namespace, &snapshot_name)
        .ok_or_else(|| {
            Error::resolution(
                "VolumeSnapshot",
                format!("{}/{}", pvc.key.namespace, snapshot_name),
                format!("source of {} not found", pvc.key),
            )
        })?;

    let content_name = snapshot.content_name().ok_or_else(|| {
        Error::resolution(
            "VolumeSnapshot",
            format!("{}/{}", pvc.key.namespace, snapshot_name),
            "not bound to a snapshot content",
        )
    })?;

    let content = store.volume_snapshot_content(content_name).ok_or_else(|| {
        Error::resolution("VolumeSnapshotContent", content_name, "not found")
    })?;

    let volume = content.spec.source.volume_handle.as_deref().ok_or_else(|| {
        Error::resolution("VolumeSnapshotContent", content_name, "has no source volume handle")
    })?;

    let pv = store
        .persistent_volume(volume)
        .ok_or_else(|| Error::resolution("PersistentVolume", volume, "snapshot source not found"))?;

    pv_node_name(&pv).ok_or_else(|| {
        Error::resolution("PersistentVolume", volume, "source volume is not pinned to a node")
    })
}

/// Check that every snapshot claim resolves to `node`.
///
/// Claims that are not snapshots are ignored.
pub fn check_snapshot_colocation(pvcs: &[PvcRequest], node: &str, store: &dyn ObjectStore) -> Result<bool> {
    let mut sources = BTreeSet::new();
    for pvc in pvcs.iter().filter(|p| p.snapshot) {
        sources.insert(snapshot_source_node(pvc, store)?);
    }

    match sources.len() {
        0 => Ok(true),
        1 => {
            let fits = sources.contains(node);
            if !fits {
                debug!("Snapshot sources live on {:?}, not {}", sources, node);
            }
            Ok(fits)
        }
        _ => {
            debug!("Snapshot sources span several nodes: {:?}", sources);
            Ok(false)
        }
    }
}
