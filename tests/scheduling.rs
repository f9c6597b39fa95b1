//! Predicate and priority behaviour against hand-built ledgers

mod common;

use assert_matches::assert_matches;
use common::*;
use local_storage_scheduler::cache::{ExclusiveResource, NodeStorageCache};
use local_storage_scheduler::scheduler::algo::{allocate_exclusive, allocate_lvm};
use local_storage_scheduler::scheduler::classifier::classify_claim;
use local_storage_scheduler::scheduler::priorities::{capacity_match_score, count_match_score};
use local_storage_scheduler::scheduler::PvcRequest;
use local_storage_scheduler::{Error, PvcKey, VolumeKind, MAX_SCORE, MIN_SCORE};
use std::sync::Arc;

fn request(h: &Harness, name: &str, class: &str, size: &str) -> PvcRequest {
    let claim = pvc(name, class, size);
    h.store.upsert(claim.clone());
    classify_claim(Arc::new(claim), h.store.as_ref()).unwrap().unwrap()
}

fn shared_node(name: &str, allocated: u64) -> NodeStorageCache {
    let mut node = NodeStorageCache::new(name).with_volume_group("share", 100 * GI);
    if allocated > 0 {
        node.allocate_volume("share", &PvcKey::new("kube-system", "existing"), allocated)
            .unwrap();
    }
    node
}

#[test]
fn test_lvm_fits_remaining_capacity() {
    let h = Harness::new();
    h.cache.insert(shared_node("node-1", 20 * GI));
    h.store.upsert(pvc("a", "open-local-lvm", "30Gi"));
    h.store.upsert(pvc("b", "open-local-lvm", "40Gi"));
    h.store.upsert(pvc("c", "open-local-lvm", "60Gi"));

    assert!(h.ctx.fits(&pod("ok", &["a", "b"]), "node-1").unwrap());
    assert!(!h.ctx.fits(&pod("too-big", &["a", "c"]), "node-1").unwrap());

    let node = h.cache.snapshot("node-1").unwrap();
    let pvcs = [
        request(&h, "a", "open-local-lvm", "30Gi"),
        request(&h, "b", "open-local-lvm", "40Gi"),
    ];
    let plan = allocate_lvm(&pvcs, &node).unwrap();
    assert!(plan.plan().unwrap().iter().all(|p| p.volume_group == "share"));
}

#[test]
fn test_mount_point_best_fit() {
    let h = Harness::new();
    let node = NodeStorageCache::new("node-1")
        .with_mount_point(ExclusiveResource::new("/mnt/a", 10 * GI))
        .with_mount_point(ExclusiveResource::new("/mnt/b", 50 * GI));

    let claim = request(&h, "mp", "open-local-mountpoint", "20Gi");
    let plan = allocate_exclusive(VolumeKind::MountPoint, &[claim], &node).unwrap();
    let plan = plan.plan().unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].resource, "/mnt/b");
    assert_eq!(plan[0].capacity_bytes, 50 * GI);
}

#[test]
fn test_more_claims_than_free_resources_never_fit() {
    let h = Harness::new();
    let mut node = NodeStorageCache::new("node-1")
        .with_device(ExclusiveResource::new("/dev/sdb", 500 * GI))
        .with_device(ExclusiveResource::new("/dev/sdc", 500 * GI));
    node.bind_exclusive(VolumeKind::Device, "/dev/sdc", &PvcKey::new("default", "held"))
        .unwrap();
    h.cache.insert(node);

    h.store.upsert(pvc("d1", "open-local-device", "1Gi"));
    h.store.upsert(pvc("d2", "open-local-device", "1Gi"));
    assert!(h.ctx.fits(&pod("one", &["d1"]), "node-1").unwrap());
    assert!(!h.ctx.fits(&pod("two", &["d1", "d2"]), "node-1").unwrap());
}

#[test]
fn test_decisions_are_deterministic() {
    let h = Harness::new();
    h.cache.insert(shared_node("node-1", 20 * GI));
    h.cache.insert(
        NodeStorageCache::new("node-2")
            .with_volume_group("share", 60 * GI)
            .with_device(ExclusiveResource::new("/dev/sdb", 100 * GI)),
    );
    h.store.upsert(pvc("data", "open-local-lvm", "50Gi"));
    h.store.upsert(pvc("raw", "open-local-device", "10Gi"));
    let app = pod("app", &["data", "raw"]);

    for node in ["node-1", "node-2"] {
        let fits = h.ctx.fits(&app, node).unwrap();
        let score = h.ctx.prioritize(&app, node).unwrap();
        for _ in 0..10 {
            assert_eq!(h.ctx.fits(&app, node).unwrap(), fits);
            assert_eq!(h.ctx.prioritize(&app, node).unwrap(), score);
        }
    }
    assert!(!h.ctx.fits(&app, "node-1").unwrap());
    assert!(h.ctx.fits(&app, "node-2").unwrap());
}

#[test]
fn test_snapshot_sources_on_different_nodes() {
    let h = Harness::new();
    for node in ["node-1", "node-2", "node-3"] {
        h.cache.insert(shared_node(node, 0));
    }
    add_snapshot_lineage(&h.store, "snap-1", "node-1");
    add_snapshot_lineage(&h.store, "snap-2", "node-2");
    h.store.upsert(snapshot_pvc("r1", "snap-1", "10Gi"));
    h.store.upsert(snapshot_pvc("r2", "snap-2", "10Gi"));

    let restore = pod("restore", &["r1"]);
    assert!(h.ctx.fits(&restore, "node-1").unwrap());
    assert!(!h.ctx.fits(&restore, "node-2").unwrap());

    let split = pod("split", &["r1", "r2"]);
    for node in ["node-1", "node-2", "node-3"] {
        assert!(!h.ctx.fits(&split, node).unwrap(), "{}", node);
    }
}

#[test]
fn test_snapshot_claims_consume_capacity() {
    let h = Harness::new();
    h.cache.insert(shared_node("node-1", 95 * GI));
    add_snapshot_lineage(&h.store, "snap-1", "node-1");
    h.store.upsert(snapshot_pvc("small", "snap-1", "5Gi"));
    h.store.upsert(snapshot_pvc("large", "snap-1", "10Gi"));

    assert!(h.ctx.fits(&pod("a", &["small"]), "node-1").unwrap());
    assert!(!h.ctx.fits(&pod("b", &["large"]), "node-1").unwrap());
}

#[test]
fn test_count_match_examples() {
    assert_eq!(count_match_score(&[(2, 4)], 100), 50);
    assert_eq!(count_match_score(&[(2, 4), (0, 3)], 100), 50);
    assert_eq!(count_match_score(&[(1, 0)], 100), 0);
    assert_eq!(count_match_score(&[], 100), MIN_SCORE);
}

#[test]
fn test_scores_stay_in_range() {
    for requested in [0u64, 1, GI, 60 * GI, 1000 * GI] {
        for free in [0u64, 1, GI, 100 * GI] {
            let score = capacity_match_score(requested, free, MAX_SCORE);
            assert!((MIN_SCORE..=MAX_SCORE).contains(&score), "{} / {}", requested, free);
        }
    }
    for requested in 0..6usize {
        for free in 0..6usize {
            let score = count_match_score(&[(requested, free), (free, requested)], MAX_SCORE);
            assert!((MIN_SCORE..=MAX_SCORE).contains(&score));
        }
    }
}

#[test]
fn test_tighter_fit_scores_higher() {
    let h = Harness::new();
    h.cache.insert(shared_node("big", 0));
    h.cache.insert(NodeStorageCache::new("small").with_volume_group("share", 50 * GI));
    h.store.upsert(pvc("data", "open-local-lvm", "40Gi"));
    let app = pod("app", &["data"]);

    let big = h.ctx.prioritize(&app, "big").unwrap();
    let small = h.ctx.prioritize(&app, "small").unwrap();
    assert_eq!(big, 4);
    assert_eq!(small, 8);
}

#[test]
fn test_pod_without_local_claims() {
    let h = Harness::new();
    h.store.upsert(pvc("remote", "nfs", "1Gi"));
    let app = pod("app", &["remote"]);

    // no ledger entry is needed for pods the extender does not constrain
    assert!(h.ctx.fits(&app, "anywhere").unwrap());
    assert_eq!(h.ctx.prioritize(&app, "anywhere").unwrap(), MIN_SCORE);
}

#[test]
fn test_missing_claim_fails_the_pod() {
    let h = Harness::new();
    h.cache.insert(shared_node("node-1", 0));
    let err = h.ctx.fits(&pod("app", &["ghost"]), "node-1").unwrap_err();
    assert!(err.is_pod_fatal());
    assert_matches!(h.ctx.fits(&pod("app", &[]), "node-1"), Ok(true));

    h.store.upsert(pvc("data", "open-local-lvm", "1Gi"));
    let err = h.ctx.fits(&pod("app", &["data"]), "unknown").unwrap_err();
    assert_matches!(err, Error::NodeCacheNotFound { .. });
    assert!(!err.is_pod_fatal());
}
