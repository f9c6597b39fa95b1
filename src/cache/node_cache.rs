//! Per-node resource ledger
//!
//! Tracks volume groups (shared, carved into logical volumes) and exclusive
//! resources (mount points and raw devices, bound one-to-one to PVCs) for a
//! single node, together with their allocation state.

use crate::crd::NodeLocalStorageStatus;
use crate::domain::{PvcKey, VolumeKind};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

// =============================================================================
// Volume Group
// =============================================================================

/// A shareable pool of local block capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroup {
    pub name: String,
    pub total_bytes: u64,
    pub allocated_bytes: u64,
    /// Logical volumes carved from this group, by owning PVC
    pub volumes: BTreeMap<PvcKey, u64>,
}

impl VolumeGroup {
    pub fn new(name: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            name: name.into(),
            total_bytes,
            allocated_bytes: 0,
            volumes: BTreeMap::new(),
        }
    }

    /// Bytes still available for new logical volumes
    #[inline]
    pub fn free_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.allocated_bytes)
    }

    /// Record (or resize) the logical volume of a PVC
    fn upsert_volume(&mut self, pvc: &PvcKey, size_bytes: u64) -> Result<()> {
        let allocated = self.allocated_with(pvc, size_bytes)?;
        self.volumes.insert(pvc.clone(), size_bytes);
        self.allocated_bytes = allocated;
        Ok(())
    }

    /// Allocation after recording `size_bytes` for a PVC, if it fits
    fn allocated_with(&self, pvc: &PvcKey, size_bytes: u64) -> Result<u64> {
        let previous = self.volumes.get(pvc).copied().unwrap_or(0);
        self.allocated_bytes
            .checked_sub(previous)
            .and_then(|rest| rest.checked_add(size_bytes))
            .filter(|allocated| *allocated <= self.total_bytes)
            .ok_or_else(|| {
                Error::LedgerInconsistency(format!(
                    "volume group {} cannot hold {} bytes for {}: {} of {} bytes allocated",
                    self.name, size_bytes, pvc, self.allocated_bytes, self.total_bytes
                ))
            })
    }

    fn remove_volume(&mut self, pvc: &PvcKey) -> Option<u64> {
        let size = self.volumes.remove(pvc)?;
        self.allocated_bytes = self.allocated_bytes.saturating_sub(size);
        Some(size)
    }
}

// =============================================================================
// Exclusive Resource
// =============================================================================

/// A mount point or raw device bound to at most one PVC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusiveResource {
    /// Mount path or device path
    pub name: String,
    /// Backing device (mount points only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub capacity_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub read_only: bool,
    /// PVC currently holding the resource
    #[serde(default)]
    pub bound_pvc: Option<PvcKey>,
}

impl ExclusiveResource {
    pub fn new(name: impl Into<String>, capacity_bytes: u64) -> Self {
        Self {
            name: name.into(),
            device: None,
            capacity_bytes,
            media_type: None,
            read_only: false,
            bound_pvc: None,
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.bound_pvc.is_some()
    }

    /// Free and writable
    #[inline]
    pub fn is_available(&self) -> bool {
        !self.is_allocated() && !self.read_only
    }
}

// =============================================================================
// Node Storage Cache
// =============================================================================

/// Local storage ledger of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStorageCache {
    pub node_name: String,
    pub volume_groups: BTreeMap<String, VolumeGroup>,
    pub mount_points: Vec<ExclusiveResource>,
    pub devices: Vec<ExclusiveResource>,
    pub updated_at: DateTime<Utc>,
}

impl NodeStorageCache {
    /// Create an empty ledger for a node
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            volume_groups: BTreeMap::new(),
            mount_points: Vec::new(),
            devices: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_volume_group(mut self, name: &str, total_bytes: u64) -> Self {
        self.volume_groups
            .insert(name.to_string(), VolumeGroup::new(name, total_bytes));
        self
    }

    pub fn with_mount_point(mut self, resource: ExclusiveResource) -> Self {
        self.mount_points.push(resource);
        self
    }

    pub fn with_device(mut self, resource: ExclusiveResource) -> Self {
        self.devices.push(resource);
        self
    }

    /// Exclusive resources of a kind (empty for LVM)
    pub fn exclusive(&self, kind: VolumeKind) -> &[ExclusiveResource] {
        match kind {
            VolumeKind::MountPoint => &self.mount_points,
            VolumeKind::Device => &self.devices,
            VolumeKind::Lvm => &[],
        }
    }

    fn exclusive_mut(&mut self, kind: VolumeKind) -> Result<&mut Vec<ExclusiveResource>> {
        match kind {
            VolumeKind::MountPoint => Ok(&mut self.mount_points),
            VolumeKind::Device => Ok(&mut self.devices),
            VolumeKind::Lvm => Err(Error::Internal(
                "LVM volumes are not exclusive resources".into(),
            )),
        }
    }

    /// Number of free exclusive resources of a kind
    pub fn free_count(&self, kind: VolumeKind) -> usize {
        self.exclusive(kind).iter().filter(|r| r.is_available()).count()
    }

    /// Free bytes summed across all volume groups
    pub fn lvm_free_bytes(&self) -> u64 {
        self.volume_groups
            .values()
            .fold(0u64, |sum, vg| sum.saturating_add(vg.free_bytes()))
    }

    /// Volume group currently holding a PVC's logical volume
    pub fn volume_of(&self, pvc: &PvcKey) -> Option<(&str, u64)> {
        self.volume_groups.values().find_map(|vg| {
            vg.volumes
                .get(pvc)
                .map(|size| (vg.name.as_str(), *size))
        })
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Record the logical volume of a PVC in a volume group.
    ///
    /// Re-recording the same PVC resizes it; a PVC moving groups is released
    /// from the old one first.
    pub fn allocate_volume(&mut self, vg_name: &str, pvc: &PvcKey, size_bytes: u64) -> Result<()> {
        let target = self.volume_groups.get(vg_name).ok_or_else(|| {
            Error::LedgerInconsistency(format!(
                "volume group {} not found on node {}",
                vg_name, self.node_name
            ))
        })?;
        target.allocated_with(pvc, size_bytes)?;

        // a PVC lives in one group at a time
        for group in self.volume_groups.values_mut().filter(|g| g.name != vg_name) {
            group.remove_volume(pvc);
        }
        if let Some(group) = self.volume_groups.get_mut(vg_name) {
            group.upsert_volume(pvc, size_bytes)?;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Release a PVC's logical volume, returning (group, size)
    pub fn release_volume(&mut self, pvc: &PvcKey) -> Option<(String, u64)> {
        let released = self.volume_groups.values_mut().find_map(|vg| {
            vg.remove_volume(pvc).map(|size| (vg.name.clone(), size))
        });
        if released.is_some() {
            self.updated_at = Utc::now();
        }
        released
    }

    /// Bind an exclusive resource to a PVC.
    ///
    /// Binding an already bound pair again is a no-op.
    pub fn bind_exclusive(&mut self, kind: VolumeKind, resource: &str, pvc: &PvcKey) -> Result<()> {
        let node = self.node_name.clone();
        let resources = self.exclusive_mut(kind)?;

        if let Some(other) = resources
            .iter()
            .find(|r| r.name != resource && r.bound_pvc.as_ref() == Some(pvc))
        {
            return Err(Error::DoubleBinding {
                node,
                resource: other.name.clone(),
                bound_to: pvc.to_string(),
                pvc: pvc.to_string(),
            });
        }

        let target = resources
            .iter_mut()
            .find(|r| r.name == resource)
            .ok_or_else(|| {
                Error::LedgerInconsistency(format!(
                    "{} {} not found on node {}",
                    kind, resource, node
                ))
            })?;

        match &target.bound_pvc {
            Some(bound) if bound == pvc => return Ok(()),
            Some(bound) => {
                return Err(Error::DoubleBinding {
                    node,
                    resource: resource.to_string(),
                    bound_to: bound.to_string(),
                    pvc: pvc.to_string(),
                })
            }
            None => target.bound_pvc = Some(pvc.clone()),
        }

        self.updated_at = Utc::now();
        Ok(())
    }

    /// Release the exclusive resource of a kind held by a PVC
    pub fn release_exclusive(&mut self, kind: VolumeKind, pvc: &PvcKey) -> Option<String> {
        let resources = self.exclusive_mut(kind).ok()?;
        let resource = resources
            .iter_mut()
            .find(|r| r.bound_pvc.as_ref() == Some(pvc))?;
        resource.bound_pvc = None;
        let name = resource.name.clone();
        self.updated_at = Utc::now();
        Some(name)
    }

    /// Release everything a PVC holds on this node
    pub fn release_pvc(&mut self, pvc: &PvcKey) -> bool {
        let volume = self.release_volume(pvc).is_some();
        let mount_point = self.release_exclusive(VolumeKind::MountPoint, pvc).is_some();
        let device = self.release_exclusive(VolumeKind::Device, pvc).is_some();
        volume || mount_point || device
    }

    /// Rebuild the inventory from an agent report, keeping allocations of
    /// resources that still exist.
    pub fn apply_inventory(&mut self, status: &NodeLocalStorageStatus) {
        let info = &status.node_storage_info;
        let filtered = &status.filtered_storage_info;

        let mut volume_groups = BTreeMap::new();
        for vg in &info.volume_groups {
            if !is_selected(&filtered.volume_groups, &vg.name) {
                continue;
            }
            let capacity = if vg.allocatable > 0 { vg.allocatable } else { vg.total };
            let mut group = VolumeGroup::new(vg.name.clone(), capacity);

            if let Some(old) = self.volume_groups.remove(&vg.name) {
                if old.allocated_bytes > capacity {
                    warn!(
                        "Volume group {} on {} shrank to {} bytes below {} allocated",
                        vg.name, self.node_name, capacity, old.allocated_bytes
                    );
                    group.total_bytes = old.allocated_bytes;
                }
                group.allocated_bytes = old.allocated_bytes;
                group.volumes = old.volumes;
            }
            volume_groups.insert(vg.name.clone(), group);
        }
        for (name, dropped) in &self.volume_groups {
            if !dropped.volumes.is_empty() {
                warn!(
                    "Volume group {} disappeared from {} with {} volumes recorded",
                    name,
                    self.node_name,
                    dropped.volumes.len()
                );
            }
        }
        self.volume_groups = volume_groups;

        let mount_points = info
            .mount_points
            .iter()
            .filter(|mp| is_selected(&filtered.mount_points, &mp.name))
            .map(|mp| ExclusiveResource {
                name: mp.name.clone(),
                device: (!mp.device.is_empty()).then(|| mp.device.clone()),
                capacity_bytes: mp.total,
                media_type: mp.media_type.clone(),
                read_only: mp.read_only,
                bound_pvc: None,
            })
            .collect();
        self.mount_points = carry_bindings(&self.mount_points, mount_points);

        let devices = info
            .devices
            .iter()
            .filter(|d| is_selected(&filtered.devices, &d.name))
            .map(|d| ExclusiveResource {
                name: d.name.clone(),
                device: None,
                capacity_bytes: d.total,
                media_type: d.media_type.clone(),
                read_only: d.read_only,
                bound_pvc: None,
            })
            .collect();
        self.devices = carry_bindings(&self.devices, devices);

        self.updated_at = Utc::now();
    }

    /// Verify the ledger invariants
    pub fn check_invariants(&self) -> Result<()> {
        for vg in self.volume_groups.values() {
            let sum: u128 = vg.volumes.values().map(|size| u128::from(*size)).sum();
            if sum != u128::from(vg.allocated_bytes) || vg.allocated_bytes > vg.total_bytes {
                return Err(Error::LedgerInconsistency(format!(
                    "volume group {} on {}: {} allocated, {} in volumes, {} total",
                    vg.name, self.node_name, vg.allocated_bytes, sum, vg.total_bytes
                )));
            }
        }
        for kind in [VolumeKind::MountPoint, VolumeKind::Device] {
            let mut seen = HashSet::new();
            for pvc in self.exclusive(kind).iter().filter_map(|r| r.bound_pvc.as_ref()) {
                if !seen.insert(pvc) {
                    return Err(Error::LedgerInconsistency(format!(
                        "{} bound to more than one {} on {}",
                        pvc, kind, self.node_name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Empty filter lists select everything
fn is_selected(filter: &[String], name: &str) -> bool {
    filter.is_empty() || filter.iter().any(|f| f == name)
}

fn carry_bindings(
    old: &[ExclusiveResource],
    mut new: Vec<ExclusiveResource>,
) -> Vec<ExclusiveResource> {
    for resource in &mut new {
        resource.bound_pvc = old
            .iter()
            .find(|o| o.name == resource.name)
            .and_then(|o| o.bound_pvc.clone());
    }
    new
}
