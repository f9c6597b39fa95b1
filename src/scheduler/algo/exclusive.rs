//! Exclusive resource allocation
//!
//! Mount points and devices are matched one-to-one with claims. Free
//! resources are ordered by ascending capacity, claims by ascending size, and
//! each claim takes the smallest free resource that can hold it (best fit).
//! Equal capacities and sizes are ordered by name so plans are reproducible.

use super::Allocation;
use crate::cache::{ExclusiveResource, NodeStorageCache};
use crate::domain::{PvcKey, VolumeKind};
use crate::error::{Error, Result};
use crate::scheduler::classifier::PvcRequest;

/// A claim matched to an exclusive resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusivePlacement {
    pub pvc: PvcKey,
    pub resource: String,
    pub capacity_bytes: u64,
}

fn media_matches(pvc: &PvcRequest, resource: &ExclusiveResource) -> bool {
    match &pvc.media_type {
        Some(wanted) => resource
            .media_type
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(wanted)),
        None => true,
    }
}

/// Match every claim of `kind` to a distinct free resource on the node
pub fn allocate_exclusive(
    kind: VolumeKind,
    pvcs: &[PvcRequest],
    node: &NodeStorageCache,
) -> Result<Allocation<ExclusivePlacement>> {
    if !kind.is_exclusive() {
        return Err(Error::Internal(format!("{} is not an exclusive resource kind", kind)));
    }
    if let Some(stray) = pvcs.iter().find(|p| p.kind != kind) {
        return Err(Error::Internal(format!(
            "{} claim {} passed to {} allocation",
            stray.kind, stray.key, kind
        )));
    }

    let mut free: Vec<&ExclusiveResource> = node
        .exclusive(kind)
        .iter()
        .filter(|r| r.is_available())
        .collect();
    if pvcs.len() > free.len() {
        return Ok(Allocation::Infeasible(format!(
            "{} {} claims but only {} free on {}",
            pvcs.len(),
            kind,
            free.len(),
            node.node_name
        )));
    }
    free.sort_by(|a, b| {
        a.capacity_bytes
            .cmp(&b.capacity_bytes)
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut ordered: Vec<&PvcRequest> = pvcs.iter().collect();
    ordered.sort_by(|a, b| a.size_bytes.cmp(&b.size_bytes).then_with(|| a.key.cmp(&b.key)));

    let mut taken = vec![false; free.len()];
    let mut placements = Vec::with_capacity(ordered.len());

    for pvc in ordered {
        let slot = (0..free.len()).find(|&i| {
            !taken[i] && free[i].capacity_bytes >= pvc.size_bytes && media_matches(pvc, free[i])
        });
        let Some(slot) = slot else {
            return Ok(Allocation::Infeasible(format!(
                "no free {} on {} can hold {} ({} bytes{})",
                kind,
                node.node_name,
                pvc.key,
                pvc.size_bytes,
                pvc.media_type
                    .as_deref()
                    .map(|m| format!(", media {}", m))
                    .unwrap_or_default()
            )));
        };
        taken[slot] = true;
        placements.push(ExclusivePlacement {
            pvc: pvc.key.clone(),
            resource: free[slot].name.clone(),
            capacity_bytes: free[slot].capacity_bytes,
        });
    }

    Ok(Allocation::Fits(placements))
}
