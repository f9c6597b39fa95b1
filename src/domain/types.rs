//! Core domain types shared by the ledger and the scheduling engines

use crate::error::Error;
use serde::{Deserialize, Serialize};

// =============================================================================
// Local Storage Contract
// =============================================================================

/// CSI driver / storage class provisioner handled by this scheduler
pub const LOCAL_PROVISIONER: &str = "local.csi.aliyun.com";

/// Storage class parameter selecting the volume kind
pub const PARAM_VOLUME_TYPE: &str = "volumeType";

/// Storage class parameter pinning an LVM volume to one volume group
pub const PARAM_VG_NAME: &str = "vgName";

/// Storage class parameter restricting exclusive resources by media type
pub const PARAM_MEDIA_TYPE: &str = "mediaType";

/// Storage class parameter marking snapshot-sourced volumes read-only
pub const PARAM_READONLY: &str = "csi.aliyun.com/readonly";

/// PV volume attribute naming the bound mount point
pub const ATTR_MOUNT_POINT: &str = "mountPoint";

/// PV volume attribute naming the bound device
pub const ATTR_DEVICE: &str = "device";

/// Node label used in local PV node affinity
pub const LABEL_HOSTNAME: &str = "kubernetes.io/hostname";

/// Pod label patched to re-trigger scheduling of pending pods
pub const LABEL_RESCHEDULE_TIMESTAMP: &str = "local.csi.aliyun.com/reschedule-timestamp";

/// Kind of node-local resource backing a PVC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VolumeKind {
    /// Logical volume carved from a shared volume group
    #[serde(rename = "LVM")]
    Lvm,
    /// Exclusive mount point
    MountPoint,
    /// Exclusive raw block device
    Device,
}

impl VolumeKind {
    /// Parse the `volumeType` storage class parameter
    pub fn from_param(storage_class: &str, value: Option<&str>) -> Result<Self, Error> {
        match value {
            Some("LVM") | Some("lvm") => Ok(VolumeKind::Lvm),
            Some("MountPoint") | Some("mountpoint") => Ok(VolumeKind::MountPoint),
            Some("Device") | Some("device") => Ok(VolumeKind::Device),
            other => Err(Error::UnknownKind {
                storage_class: storage_class.to_string(),
                kind: other.unwrap_or_default().to_string(),
            }),
        }
    }

    /// Whether resources of this kind are bound one-to-one to a PVC
    pub fn is_exclusive(&self) -> bool {
        !matches!(self, VolumeKind::Lvm)
    }
}

impl std::fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeKind::Lvm => write!(f, "LVM"),
            VolumeKind::MountPoint => write!(f, "MountPoint"),
            VolumeKind::Device => write!(f, "Device"),
        }
    }
}

// =============================================================================
// PVC Key
// =============================================================================

/// Namespaced identity of a PersistentVolumeClaim
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PvcKey {
    pub namespace: String,
    pub name: String,
}

impl PvcKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for PvcKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl From<PvcKey> for String {
    fn from(key: PvcKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for PvcKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok(PvcKey::new(ns, name)),
            _ => Err(Error::MalformedRequest(format!(
                "invalid PVC key {:?}, expected namespace/name",
                value
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_volume_kind_from_param() {
        assert_eq!(VolumeKind::from_param("sc", Some("LVM")).unwrap(), VolumeKind::Lvm);
        assert_eq!(
            VolumeKind::from_param("sc", Some("MountPoint")).unwrap(),
            VolumeKind::MountPoint
        );
        assert_eq!(
            VolumeKind::from_param("sc", Some("Device")).unwrap(),
            VolumeKind::Device
        );
        assert_matches!(
            VolumeKind::from_param("sc", Some("Tape")),
            Err(Error::UnknownKind { kind, .. }) if kind == "Tape"
        );
        assert_matches!(
            VolumeKind::from_param("sc", None),
            Err(Error::UnknownKind { .. })
        );
    }

    #[test]
    fn test_pvc_key_string_round_trip() {
        let key = PvcKey::new("default", "data-0");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"default/data-0\"");
        let back: PvcKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);

        assert!(PvcKey::try_from("no-namespace".to_string()).is_err());
    }
}
