//! Capacity predicate
//!
//! Decides whether a node's local storage can host every local claim of a
//! pod. Stages run in order and stop at the first one that does not fit:
//! LVM, mount points, devices, snapshot colocation, then LVM again with the
//! snapshot claims included so they consume capacity too.
//!
//! The node's read lock is held for the whole evaluation, so all stages see
//! one consistent view of its remaining capacity.

use super::algo::{allocate_exclusive, allocate_lvm, check_snapshot_colocation, Allocation};
use super::classifier::{classify, PodPvcs, PvcRequest};
use super::context::SchedulingContext;
use super::trace::CallTrace;
use crate::domain::k8s::pod_key;
use crate::domain::VolumeKind;
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

/// Predicate entry point
pub fn capacity_predicate(ctx: &SchedulingContext, pod: &Pod, node: &str) -> Result<bool> {
    let mut trace = CallTrace::new(format!("Scheduling[CapacityPredicate] {} on {}", pod_key(pod), node));

    trace.step("Classifying claims");
    let pvcs = classify(pod, ctx.store(), true, true)?;
    let result = evaluate(ctx, &pvcs, node, &mut trace);

    trace.log_if_long(ctx.slow_call_threshold());
    if let Some(metrics) = ctx.metrics() {
        metrics.observe_call("predicates", trace.elapsed().as_secs_f64());
    }

    match &result {
        Ok(true) => debug!("Pod {} fits on {}", pod_key(pod), node),
        Ok(false) => {}
        Err(e) => debug!("Pod {} on {}: {}", pod_key(pod), node, e),
    }
    result
}

fn evaluate(ctx: &SchedulingContext, pvcs: &PodPvcs, node: &str, trace: &mut CallTrace) -> Result<bool> {
    if pvcs.is_empty() {
        debug!("No local storage claims, {} is not constrained", node);
        return Ok(true);
    }

    let handle = ctx
        .cache()
        .get(node)
        .ok_or_else(|| Error::NodeCacheNotFound { node: node.to_string() })?;
    let cache = handle.read();

    let plain_lvm: Vec<PvcRequest> = pvcs.lvm.iter().filter(|p| !p.snapshot).cloned().collect();
    if !plain_lvm.is_empty() {
        trace.step("Computing LVM allocation");
        if !accept(node, allocate_lvm(&plain_lvm, &cache)?) {
            return Ok(false);
        }
    }

    for (kind, step) in [
        (VolumeKind::MountPoint, "Computing mount point allocation"),
        (VolumeKind::Device, "Computing device allocation"),
    ] {
        let claims = pvcs.of_kind(kind);
        if claims.is_empty() {
            continue;
        }
        trace.step(step);
        if !accept(node, allocate_exclusive(kind, claims, &cache)?) {
            return Ok(false);
        }
    }

    if pvcs.has_snapshots() {
        trace.step("Checking snapshot colocation");
        if !check_snapshot_colocation(&pvcs.lvm, node, ctx.store())? {
            return Ok(false);
        }
        trace.step("Computing LVM allocation with snapshots");
        if !accept(node, allocate_lvm(&pvcs.lvm, &cache)?) {
            return Ok(false);
        }
    }

    Ok(true)
}

fn accept<P>(node: &str, allocation: Allocation<P>) -> bool {
    match allocation.reason() {
        Some(reason) => {
            debug!("{} does not fit: {}", node, reason);
            false
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ClusterNodeCache, ExclusiveResource, NodeStorageCache};
    use crate::config::SchedulerConfig;
    use crate::domain::{InMemoryObjectStore, PvcKey};
    use crate::scheduler::testutil::*;
    use assert_matches::assert_matches;

    fn context(store: std::sync::Arc<InMemoryObjectStore>) -> SchedulingContext {
        let cache = ClusterNodeCache::new(16);
        let mut node = NodeStorageCache::new("node-1")
            .with_volume_group("share", 100 * GI)
            .with_mount_point(ExclusiveResource::new("/mnt/a", 10 * GI))
            .with_mount_point(ExclusiveResource::new("/mnt/b", 50 * GI))
            .with_device(ExclusiveResource::new("/dev/sdb", 200 * GI).with_media_type("ssd"));
        node.allocate_volume("share", &PvcKey::new("kube-system", "existing"), 20 * GI)
            .unwrap();
        cache.insert(node);
        SchedulingContext::new(cache, store, &SchedulerConfig::default())
    }

    #[test]
    fn test_lvm_examples() {
        let store = InMemoryObjectStore::new();
        install_classes(&store);
        store.upsert(pvc("default", "a", "open-local-lvm", "30Gi"));
        store.upsert(pvc("default", "b", "open-local-lvm", "40Gi"));
        store.upsert(pvc("default", "c", "open-local-lvm", "60Gi"));
        let ctx = context(store);

        assert!(ctx.fits(&pod("default", "ok", &["a", "b"]), "node-1").unwrap());
        assert!(!ctx.fits(&pod("default", "too-big", &["a", "c"]), "node-1").unwrap());
    }

    #[test]
    fn test_mixed_kinds() {
        let store = InMemoryObjectStore::new();
        install_classes(&store);
        store.upsert(pvc("default", "data", "open-local-lvm", "10Gi"));
        store.upsert(pvc("default", "mp", "open-local-mountpoint", "20Gi"));
        store.upsert(pvc("default", "dev", "open-local-device-ssd", "100Gi"));
        store.upsert(pvc("default", "dev2", "open-local-device", "1Gi"));
        let ctx = context(store);

        assert!(ctx.fits(&pod("default", "app", &["data", "mp", "dev"]), "node-1").unwrap());
        // only one device on the node
        assert!(!ctx.fits(&pod("default", "app", &["dev", "dev2"]), "node-1").unwrap());
    }

    #[test]
    fn test_no_local_claims_always_fit() {
        let store = InMemoryObjectStore::new();
        install_classes(&store);
        store.upsert(pvc("default", "remote", "nfs", "1Ti"));
        let ctx = context(store);

        assert!(ctx.fits(&pod("default", "app", &["remote"]), "node-1").unwrap());
        assert!(ctx.fits(&pod("default", "app", &[]), "unknown-node").unwrap());
    }

    #[test]
    fn test_unknown_node_with_local_claims() {
        let store = InMemoryObjectStore::new();
        install_classes(&store);
        store.upsert(pvc("default", "data", "open-local-lvm", "10Gi"));
        let ctx = context(store);

        assert_matches!(
            ctx.fits(&pod("default", "app", &["data"]), "node-9"),
            Err(Error::NodeCacheNotFound { .. })
        );
    }

    #[test]
    fn test_missing_claim_is_pod_fatal() {
        let store = InMemoryObjectStore::new();
        install_classes(&store);
        let ctx = context(store);

        let err = ctx.fits(&pod("default", "app", &["missing"]), "node-1").unwrap_err();
        assert!(err.is_pod_fatal());
    }
}
