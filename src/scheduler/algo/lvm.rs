//! LVM allocation
//!
//! Places logical volumes into a node's volume groups. Claims pinned to a
//! group must fit there; the rest go to the group with the most free space.
//! All claims of one call are placed against a single working copy of the
//! remaining capacity, so they never double count.

use super::Allocation;
use crate::cache::NodeStorageCache;
use crate::domain::{PvcKey, VolumeKind};
use crate::error::{Error, Result};
use crate::scheduler::classifier::PvcRequest;
use std::collections::BTreeMap;

/// A claim placed into a volume group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvmPlacement {
    pub pvc: PvcKey,
    pub volume_group: String,
    pub size_bytes: u64,
}

/// Place every LVM claim on the node, in request order
pub fn allocate_lvm(pvcs: &[PvcRequest], node: &NodeStorageCache) -> Result<Allocation<LvmPlacement>> {
    let mut remaining: BTreeMap<&str, u64> = node
        .volume_groups
        .values()
        .map(|vg| (vg.name.as_str(), vg.free_bytes()))
        .collect();
    let mut placements = Vec::with_capacity(pvcs.len());

    for pvc in pvcs {
        if pvc.kind != VolumeKind::Lvm {
            return Err(Error::Internal(format!(
                "{} claim {} passed to LVM allocation",
                pvc.kind, pvc.key
            )));
        }

        let target = match pvc.vg_name.as_deref() {
            Some(pinned) => match remaining.get(pinned) {
                None => {
                    return Ok(Allocation::Infeasible(format!(
                        "volume group {} requested by {} not found on {}",
                        pinned, pvc.key, node.node_name
                    )))
                }
                Some(free) if *free < pvc.size_bytes => {
                    return Ok(Allocation::Infeasible(format!(
                        "volume group {} has {} bytes free, {} needs {}",
                        pinned, free, pvc.key, pvc.size_bytes
                    )))
                }
                Some(_) => pinned,
            },
            // BTreeMap iteration is name ordered, max_by_key keeps the last
            // maximum, so reverse to prefer the first name on ties
            None => match remaining
                .iter()
                .rev()
                .max_by_key(|(_, free)| **free)
                .filter(|(_, free)| **free >= pvc.size_bytes)
            {
                Some((name, _)) => *name,
                None => {
                    return Ok(Allocation::Infeasible(format!(
                        "no volume group on {} has {} bytes free for {}",
                        node.node_name, pvc.size_bytes, pvc.key
                    )))
                }
            },
        };

        if let Some(free) = remaining.get_mut(target) {
            *free -= pvc.size_bytes;
        }
        placements.push(LvmPlacement {
            pvc: pvc.key.clone(),
            volume_group: target.to_string(),
            size_bytes: pvc.size_bytes,
        });
    }

    Ok(Allocation::Fits(placements))
}
