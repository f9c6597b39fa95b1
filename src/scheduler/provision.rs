//! Provisioning-time claim placement
//!
//! The CSI provisioner asks where a pending claim goes before it creates the
//! volume, and asks again before it grows a bound one. Both answers are
//! recorded in the ledger before they are returned, so two requests never hand
//! out the same capacity. The PV event that follows records the same placement
//! again, which the ledger treats as a resize to the same size.

use super::algo::{allocate_exclusive, allocate_lvm, snapshot_source_node, Allocation};
use super::classifier::{classify_claim, PvcRequest};
use super::context::SchedulingContext;
use super::priorities::{capacity_match_score, kind_score, MAX_SCORE};
use crate::cache::{LedgerEvent, NodeStorageCache};
use crate::domain::k8s::{
    pvc_key, pvc_phase, pvc_requested_bytes, pvc_status_bytes, CLAIM_BOUND, CLAIM_PENDING,
};
use crate::domain::{PvcKey, VolumeKind};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use serde::{Deserialize, Serialize};
use std::slice;
use std::sync::Arc;
use tracing::{debug, info};

/// Where a claim's volume is provisioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimPlacement {
    pub pvc: PvcKey,
    pub node: String,
    pub volume_type: VolumeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_group: Option<String>,
    /// Mount path or device path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Requested size
    pub size_bytes: u64,
    /// Capacity of the exclusive resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_bytes: Option<u64>,
}

/// Growth of a bound logical volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimExpansion {
    pub pvc: PvcKey,
    pub node: String,
    pub volume_group: String,
    pub previous_bytes: u64,
    pub size_bytes: u64,
}

// =============================================================================
// Validation
// =============================================================================

/// Look up a claim the provisioner asks about.
///
/// Pending claims are accepted. Bound claims are accepted only while their
/// request differs from the capacity in their status.
pub fn provisioning_claim(
    ctx: &SchedulingContext,
    namespace: &str,
    name: &str,
) -> Result<Arc<PersistentVolumeClaim>> {
    if namespace.is_empty() || name.is_empty() {
        return Err(Error::MalformedRequest(format!(
            "namespace and name must both be set, got {:?}/{:?}",
            namespace, name
        )));
    }
    let pvc = ctx
        .store()
        .persistent_volume_claim(namespace, name)
        .ok_or_else(|| {
            Error::resolution("PersistentVolumeClaim", format!("{}/{}", namespace, name), "not found")
        })?;

    match pvc_phase(&pvc) {
        CLAIM_PENDING => Ok(pvc),
        CLAIM_BOUND if is_resizing(&pvc) => Ok(pvc),
        phase => Err(Error::MalformedRequest(format!(
            "pvc {}/{} cannot be provisioned in phase {}",
            namespace, name, phase
        ))),
    }
}

fn is_resizing(pvc: &PersistentVolumeClaim) -> bool {
    let requested = pvc_requested_bytes(pvc).unwrap_or(0);
    requested != pvc_status_bytes(pvc).unwrap_or(0)
}

fn local_request(ctx: &SchedulingContext, pvc: Arc<PersistentVolumeClaim>) -> Result<PvcRequest> {
    let key = pvc_key(&pvc);
    classify_claim(pvc, ctx.store())?
        .ok_or_else(|| Error::MalformedRequest(format!("pvc {} is not backed by local storage", key)))
}

// =============================================================================
// Placement
// =============================================================================

/// Plan a single claim on one node
fn plan_on(request: &PvcRequest, cache: &NodeStorageCache) -> Result<Allocation<ClaimPlacement>> {
    let node = &cache.node_name;
    let claims = slice::from_ref(request);
    match request.kind {
        VolumeKind::Lvm => Ok(allocate_lvm(claims, cache)?.map(|p| ClaimPlacement {
            pvc: p.pvc,
            node: node.clone(),
            volume_type: VolumeKind::Lvm,
            volume_group: Some(p.volume_group),
            resource: None,
            size_bytes: p.size_bytes,
            capacity_bytes: None,
        })),
        kind => Ok(allocate_exclusive(kind, claims, cache)?.map(|p| ClaimPlacement {
            pvc: p.pvc,
            node: node.clone(),
            volume_type: kind,
            volume_group: None,
            resource: Some(p.resource),
            size_bytes: request.size_bytes,
            capacity_bytes: Some(p.capacity_bytes),
        })),
    }
}

fn fit_score(request: &PvcRequest, cache: &NodeStorageCache) -> i64 {
    match request.kind {
        VolumeKind::Lvm => capacity_match_score(request.size_bytes, cache.lvm_free_bytes(), MAX_SCORE),
        kind => kind_score(1, cache.free_count(kind), MAX_SCORE),
    }
}

/// Placement already held by the claim on this node
fn recorded_on(cache: &NodeStorageCache, request: &PvcRequest) -> Option<ClaimPlacement> {
    match request.kind {
        VolumeKind::Lvm => cache.volume_of(&request.key).map(|(vg, size)| ClaimPlacement {
            pvc: request.key.clone(),
            node: cache.node_name.clone(),
            volume_type: VolumeKind::Lvm,
            volume_group: Some(vg.to_string()),
            resource: None,
            size_bytes: size,
            capacity_bytes: None,
        }),
        kind => cache
            .exclusive(kind)
            .iter()
            .find(|r| r.bound_pvc.as_ref() == Some(&request.key))
            .map(|r| ClaimPlacement {
                pvc: request.key.clone(),
                node: cache.node_name.clone(),
                volume_type: kind,
                volume_group: None,
                resource: Some(r.name.clone()),
                size_bytes: request.size_bytes,
                capacity_bytes: Some(r.capacity_bytes),
            }),
    }
}

fn recorded_placement(ctx: &SchedulingContext, request: &PvcRequest) -> Option<ClaimPlacement> {
    ctx.cache()
        .node_names()
        .into_iter()
        .find_map(|node| ctx.cache().read(&node, |cache| recorded_on(cache, request)).flatten())
}

/// Write a placement into the node's ledger
fn commit(cache: &mut NodeStorageCache, placement: &ClaimPlacement) -> Result<LedgerEvent> {
    let node = cache.node_name.clone();
    match (&placement.volume_group, &placement.resource) {
        (Some(vg), _) => {
            cache.allocate_volume(vg, &placement.pvc, placement.size_bytes)?;
            Ok(LedgerEvent::VolumeAllocated {
                node,
                volume_group: vg.clone(),
                pvc: placement.pvc.clone(),
                size_bytes: placement.size_bytes,
            })
        }
        (None, Some(resource)) => {
            cache.bind_exclusive(placement.volume_type, resource, &placement.pvc)?;
            Ok(LedgerEvent::ResourceBound {
                node,
                kind: placement.volume_type,
                resource: resource.clone(),
                pvc: placement.pvc.clone(),
            })
        }
        (None, None) => Err(Error::Internal(format!(
            "placement of {} names no volume group or resource",
            placement.pvc
        ))),
    }
}

/// Pick and record the resource a pending claim will be provisioned on.
///
/// With `node` set only that node is considered. Otherwise every node in the
/// ledger is ranked, tightest fit first and ties broken by name. Snapshot
/// claims are restricted to the node holding their source volume. Asking
/// again for a claim that is already placed returns the recorded placement.
pub fn schedule_claim(
    ctx: &SchedulingContext,
    namespace: &str,
    name: &str,
    node: Option<&str>,
) -> Result<ClaimPlacement> {
    let pvc = provisioning_claim(ctx, namespace, name)?;
    if pvc_phase(&pvc) != CLAIM_PENDING {
        return Err(Error::MalformedRequest(format!(
            "pvc {}/{} is already bound, expand it instead",
            namespace, name
        )));
    }
    let request = local_request(ctx, pvc)?;

    if let Some(existing) = recorded_placement(ctx, &request) {
        return match node {
            Some(wanted) if wanted != existing.node => Err(Error::LedgerInconsistency(format!(
                "{} is already placed on {}, not {}",
                request.key, existing.node, wanted
            ))),
            _ => {
                debug!("{} already placed on {}", request.key, existing.node);
                Ok(existing)
            }
        };
    }

    let mut candidates = match node {
        Some(node) => {
            if ctx.store().node(node).is_none() {
                return Err(Error::resolution("Node", node, "not found"));
            }
            if !ctx.cache().contains(node) {
                return Err(Error::NodeCacheNotFound { node: node.to_string() });
            }
            vec![node.to_string()]
        }
        None => ctx.cache().node_names(),
    };
    if request.snapshot {
        let source = snapshot_source_node(&request, ctx.store())?;
        candidates.retain(|n| *n == source);
    }

    let mut reasons = Vec::new();
    let mut ranked = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let Some(handle) = ctx.cache().get(&candidate) else {
            continue;
        };
        let cache = handle.read();
        match plan_on(&request, &cache)? {
            Allocation::Fits(_) => ranked.push((fit_score(&request, &cache), candidate)),
            Allocation::Infeasible(reason) => reasons.push(reason),
        }
    }
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    for (_, candidate) in ranked {
        let Some(handle) = ctx.cache().get(&candidate) else {
            continue;
        };
        let mut cache = handle.write();
        // plan again, another request may have taken the space since ranking
        let placement = match plan_on(&request, &cache)? {
            Allocation::Fits(plan) => plan.into_iter().next(),
            Allocation::Infeasible(reason) => {
                reasons.push(reason);
                None
            }
        };
        let Some(placement) = placement else {
            continue;
        };

        let event = commit(&mut cache, &placement)?;
        if let Some(metrics) = ctx.metrics() {
            metrics.observe_node(&cache);
        }
        drop(cache);
        ctx.cache().emit(event);
        info!(
            "Placed {} {} on {}",
            placement.volume_type, placement.pvc, placement.node
        );
        return Ok(placement);
    }

    Err(Error::InsufficientStorage {
        pvc: request.key.to_string(),
        reason: if reasons.is_empty() {
            "no candidate node".to_string()
        } else {
            reasons.join("; ")
        },
    })
}

// =============================================================================
// Expansion
// =============================================================================

/// Grow the recorded logical volume of a bound claim to its new request.
///
/// Asking again once the ledger already holds the new size changes nothing.
pub fn expand_claim(ctx: &SchedulingContext, namespace: &str, name: &str) -> Result<ClaimExpansion> {
    let pvc = provisioning_claim(ctx, namespace, name)?;
    let requested = pvc_requested_bytes(&pvc)?;
    let recorded = pvc_status_bytes(&pvc).unwrap_or(0);
    if pvc_phase(&pvc) != CLAIM_BOUND || requested <= recorded {
        return Err(Error::MalformedRequest(format!(
            "pvc {}/{} is not being expanded: requests {} bytes, holds {}",
            namespace, name, requested, recorded
        )));
    }
    let request = local_request(ctx, pvc)?;
    if request.kind != VolumeKind::Lvm {
        return Err(Error::MalformedRequest(format!(
            "{} volume of {} cannot be expanded",
            request.kind, request.key
        )));
    }

    for node in ctx.cache().node_names() {
        let Some(handle) = ctx.cache().get(&node) else {
            continue;
        };
        let mut cache = handle.write();
        let Some((vg, current)) = cache
            .volume_of(&request.key)
            .map(|(vg, size)| (vg.to_string(), size))
        else {
            continue;
        };

        if requested > current {
            cache
                .allocate_volume(&vg, &request.key, requested)
                .map_err(|e| Error::InsufficientStorage {
                    pvc: request.key.to_string(),
                    reason: e.to_string(),
                })?;
            if let Some(metrics) = ctx.metrics() {
                metrics.observe_node(&cache);
            }
            drop(cache);
            ctx.cache().emit(LedgerEvent::VolumeAllocated {
                node: node.clone(),
                volume_group: vg.clone(),
                pvc: request.key.clone(),
                size_bytes: requested,
            });
            info!("Expanded {} on {}/{} from {} to {} bytes", request.key, node, vg, current, requested);
        }
        return Ok(ClaimExpansion {
            pvc: request.key,
            node,
            volume_group: vg,
            previous_bytes: current,
            size_bytes: requested,
        });
    }

    Err(Error::resolution(
        "PersistentVolumeClaim",
        request.key.to_string(),
        "no logical volume recorded",
    ))
}
