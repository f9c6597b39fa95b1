//! Object builders shared by the scheduler unit tests

use crate::crd::{
    DeviceInfo, MountPointInfo, NodeLocalStorage, NodeLocalStorageSpec, NodeLocalStorageStatus,
    NodeStorageInfo, VolumeGroupInfo,
};
use crate::domain::k8s::CLAIM_BOUND;
use crate::domain::{InMemoryObjectStore, LABEL_HOSTNAME, LOCAL_PROVISIONER};
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    ObjectReference, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimStatus, PersistentVolumeClaimVolumeSource, PersistentVolumeSpec, Pod,
    PodSpec, TypedLocalObjectReference, Volume, VolumeNodeAffinity, VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

pub const GI: u64 = 1024 * 1024 * 1024;

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

/// The storage classes used across the tests
pub fn install_classes(store: &InMemoryObjectStore) {
    store.upsert(storage_class("open-local-lvm", LOCAL_PROVISIONER, &[("volumeType", "LVM")]));
    store.upsert(storage_class(
        "open-local-lvm-share",
        LOCAL_PROVISIONER,
        &[("volumeType", "LVM"), ("vgName", "share")],
    ));
    store.upsert(storage_class(
        "open-local-mountpoint-hdd",
        LOCAL_PROVISIONER,
        &[("volumeType", "MountPoint"), ("mediaType", "hdd")],
    ));
    store.upsert(storage_class(
        "open-local-mountpoint",
        LOCAL_PROVISIONER,
        &[("volumeType", "MountPoint")],
    ));
    store.upsert(storage_class(
        "open-local-device-ssd",
        LOCAL_PROVISIONER,
        &[("volumeType", "Device"), ("mediaType", "ssd")],
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
    store.upsert(storage_class(
        "open-local-unknown",
        LOCAL_PROVISIONER,
        &[("volumeType", "Tape")],
    ));
    store.upsert(storage_class("nfs", "nfs.csi.k8s.io", &[]));
}

pub fn pvc(namespace: &str, name: &str, class: &str, size: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            namespace: Some(namespace.into()),
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

pub fn snapshot_pvc(namespace: &str, name: &str, snapshot: &str, size: &str) -> PersistentVolumeClaim {
    let mut claim = pvc(namespace, name, "open-local-lvm-snapshot", size);
    if let Some(spec) = claim.spec.as_mut() {
        spec.data_source = Some(TypedLocalObjectReference {
            api_group: Some("snapshot.storage.k8s.io".into()),
            kind: "VolumeSnapshot".into(),
            name: snapshot.into(),
        });
    }
    claim
}

pub fn bound(mut claim: PersistentVolumeClaim) -> PersistentVolumeClaim {
    claim.status = Some(PersistentVolumeClaimStatus {
        phase: Some(CLAIM_BOUND.into()),
        ..Default::default()
    });
    claim
}

pub fn pod(namespace: &str, name: &str, claims: &[&str]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            namespace: Some(namespace.into()),
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
            node_affinity: Some(VolumeNodeAffinity {
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
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// NodeLocalStorage reporting volume groups `(name, bytes)`, mount points
/// and devices `(path, bytes)`
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
