//! Object builders shared by the integration tests
#![allow(dead_code)]

use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    ObjectReference, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimStatus, PersistentVolumeClaimVolumeSource, PersistentVolumeSpec, Pod,
    PodSpec, TypedLocalObjectReference, Volume, VolumeNodeAffinity, VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use local_storage_scheduler::crd::{
    DeviceInfo, MountPointInfo, NodeLocalStorage, NodeLocalStorageSpec, NodeLocalStorageStatus,
    NodeStorageInfo, VolumeGroupInfo, VolumeSnapshot, VolumeSnapshotContent,
    VolumeSnapshotContentSpec, VolumeSnapshotSpec, VolumeSnapshotStatus,
};
use local_storage_scheduler::domain::{LABEL_HOSTNAME, LOCAL_PROVISIONER};
use local_storage_scheduler::{
    ClusterNodeCache, InMemoryObjectStore, LedgerMaintainer, LedgerMetrics, SchedulerConfig,
    SchedulingContext,
};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const GI: u64 = 1024 * 1024 * 1024;

/// Store, ledger, maintainer and scheduling context wired together
pub struct Harness {
    pub store: Arc<InMemoryObjectStore>,
    pub cache: Arc<ClusterNodeCache>,
    pub maintainer: Arc<LedgerMaintainer>,
    pub ctx: Arc<SchedulingContext>,
    pub metrics: Arc<LedgerMetrics>,
}

impl Harness {
    pub fn new() -> Self {
        let store = InMemoryObjectStore::new();
        install_classes(&store);
        let cache = ClusterNodeCache::new(256);
        let metrics = Arc::new(LedgerMetrics::new().unwrap());
        let maintainer = Arc::new(
            LedgerMaintainer::new(cache.clone(), store.clone()).with_metrics(metrics.clone()),
        );
        let ctx = Arc::new(
            SchedulingContext::new(cache.clone(), store.clone(), &SchedulerConfig::default())
                .with_metrics(metrics.clone()),
        );
        Self {
            store,
            cache,
            maintainer,
            ctx,
            metrics,
        }
    }
}

pub fn storage_class(name: &str, provisioner: &str, params: &[(&str, &str)]) -> StorageClass {
    StorageClass {
        metadata: ObjectMeta {
            name: Some(name.into()),
            ..Default::default()
        },
        provisioner: provisioner.into(),
        parameters: Some(
            params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn install_classes(store: &InMemoryObjectStore) {
    store.upsert(storage_class("open-local-lvm", LOCAL_PROVISIONER, &[("volumeType", "LVM")]));
    store.upsert(storage_class(
        "open-local-lvm-share",
        LOCAL_PROVISIONER,
        &[("volumeType", "LVM"), ("vgName", "share")],
    ));
    store.upsert(storage_class(
        "open-local-mountpoint",
        LOCAL_PROVISIONER,
        &[("volumeType", "MountPoint")],
    ));
    store.upsert(storage_class(
        "open-local-device",
        LOCAL_PROVISIONER,
        &[("volumeType", "Device")],
    ));
    store.upsert(storage_class(
        "open-local-lvm-snapshot",
        LOCAL_PROVISIONER,
        &[("volumeType", "LVM"), ("csi.aliyun.com/readonly", "true")],
    ));
    store.upsert(storage_class("nfs", "nfs.csi.k8s.io", &[]));
}

pub fn pvc(name: &str, class: &str, size: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            namespace: Some("default".into()),
            name: Some(name.into()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: Some(class.into()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(size.into()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: Some(PersistentVolumeClaimStatus {
            phase: Some("Pending".into()),
            ..Default::default()
        }),
    }
}

pub fn bound(mut claim: PersistentVolumeClaim) -> PersistentVolumeClaim {
    claim.status = Some(PersistentVolumeClaimStatus {
        phase: Some("Bound".into()),
        ..Default::default()
    });
    claim
}

pub fn snapshot_pvc(name: &str, snapshot: &str, size: &str) -> PersistentVolumeClaim {
    let mut claim = pvc(name, "open-local-lvm-snapshot", size);
    if let Some(spec) = claim.spec.as_mut() {
        spec.data_source = Some(TypedLocalObjectReference {
            api_group: Some("snapshot.storage.k8s.io".into()),
            kind: "VolumeSnapshot".into(),
            name: snapshot.into(),
        });
    }
    claim
}

pub fn pod(name: &str, claims: &[&str]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            namespace: Some("default".into()),
            name: Some(name.into()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            volumes: Some(
                claims
                    .iter()
                    .map(|claim| Volume {
                        name: format!("vol-{}", claim),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: claim.to_string(),
                            read_only: None,
                        }),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn hostname_affinity(node: &str) -> VolumeNodeAffinity {
    VolumeNodeAffinity {
        required: Some(NodeSelector {
            node_selector_terms: vec![NodeSelectorTerm {
                match_expressions: Some(vec![NodeSelectorRequirement {
                    key: LABEL_HOSTNAME.into(),
                    operator: "In".into(),
                    values: Some(vec![node.into()]),
                }]),
                match_fields: None,
            }],
        }),
    }
}

/// CSI local PV bound to `default/<claim>` and pinned to `node`
pub fn local_pv(
    name: &str,
    node: &str,
    claim: &str,
    attributes: &[(&str, &str)],
    size: &str,
) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.into()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            capacity: Some(BTreeMap::from([("storage".to_string(), Quantity(size.into()))])),
            claim_ref: Some(ObjectReference {
                namespace: Some("default".into()),
                name: Some(claim.into()),
                ..Default::default()
            }),
            csi: Some(CSIPersistentVolumeSource {
                driver: LOCAL_PROVISIONER.into(),
                volume_handle: name.into(),
                volume_attributes: Some(
                    attributes
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            }),
            node_affinity: Some(hostname_affinity(node)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn lvm_pv(name: &str, node: &str, claim: &str, vg: &str, size: &str) -> PersistentVolume {
    local_pv(name, node, claim, &[("volumeType", "LVM"), ("vgName", vg)], size)
}

pub fn device_pv(name: &str, node: &str, claim: &str, device: &str, size: &str) -> PersistentVolume {
    local_pv(name, node, claim, &[("volumeType", "Device"), ("device", device)], size)
}

/// NodeLocalStorage reporting volume groups, mount points and devices as
/// `(name, bytes)`
pub fn node_local_storage(
    node: &str,
    vgs: &[(&str, u64)],
    mount_points: &[(&str, u64)],
    devices: &[(&str, u64)],
) -> NodeLocalStorage {
    let mut nls = NodeLocalStorage::new(
        node,
        NodeLocalStorageSpec {
            node_name: node.into(),
            ..Default::default()
        },
    );
    nls.status = Some(NodeLocalStorageStatus {
        node_storage_info: NodeStorageInfo {
            volume_groups: vgs
                .iter()
                .map(|(name, bytes)| VolumeGroupInfo {
                    name: name.to_string(),
                    total: *bytes,
                    allocatable: *bytes,
                    ..Default::default()
                })
                .collect(),
            mount_points: mount_points
                .iter()
                .map(|(name, bytes)| MountPointInfo {
                    name: name.to_string(),
                    total: *bytes,
                    ..Default::default()
                })
                .collect(),
            devices: devices
                .iter()
                .map(|(name, bytes)| DeviceInfo {
                    name: name.to_string(),
                    total: *bytes,
                    ..Default::default()
                })
                .collect(),
        },
        ..Default::default()
    });
    nls
}

/// Snapshot `snapshot` whose source volume lives on `node`
pub fn add_snapshot_lineage(store: &InMemoryObjectStore, snapshot: &str, node: &str) {
    let content = format!("snapcontent-{}", snapshot);
    let volume = format!("pv-{}", snapshot);

    let mut vs = VolumeSnapshot::new(snapshot, VolumeSnapshotSpec::default());
    vs.metadata.namespace = Some("default".into());
    vs.status = Some(VolumeSnapshotStatus {
        bound_volume_snapshot_content_name: Some(content.clone()),
        ready_to_use: Some(true),
    });
    store.upsert(vs);

    let mut spec = VolumeSnapshotContentSpec::default();
    spec.source.volume_handle = Some(volume.clone());
    store.upsert(VolumeSnapshotContent::new(&content, spec));

    store.upsert(PersistentVolume {
        metadata: ObjectMeta {
            name: Some(volume),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            node_affinity: Some(hostname_affinity(node)),
            ..Default::default()
        }),
        ..Default::default()
    });
}
