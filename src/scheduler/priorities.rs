//! Priority functions
//!
//! Scores are bounded to `[MIN_SCORE, MAX_SCORE]`, the extender priority
//! range. Both functions favour nodes whose free local resources are close
//! to what the pod requests, packing workloads tightly.

use super::classifier::{classify, PodPvcs};
use super::context::SchedulingContext;
use super::trace::CallTrace;
use crate::cache::NodeStorageCache;
use crate::domain::k8s::pod_key;
use crate::domain::VolumeKind;
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

pub const MIN_SCORE: i64 = 0;
pub const MAX_SCORE: i64 = 10;

#[inline]
fn clamp(score: i64, max_score: i64) -> i64 {
    score.clamp(MIN_SCORE, max_score)
}

// =============================================================================
// Pure Formulas
// =============================================================================

/// Score of one exclusive kind: `requested * max / free`, 0 when nothing is free
pub fn kind_score(requested: usize, free: usize, max_score: i64) -> i64 {
    if requested == 0 || free == 0 {
        return 0;
    }
    clamp((requested as i64).saturating_mul(max_score) / free as i64, max_score)
}

/// Mean of the per-kind scores over the kinds actually requested.
///
/// Each entry is `(requested, free)`.
pub fn count_match_score(kinds: &[(usize, usize)], max_score: i64) -> i64 {
    let requested: Vec<i64> = kinds
        .iter()
        .filter(|(requested, _)| *requested > 0)
        .map(|(requested, free)| kind_score(*requested, *free, max_score))
        .collect();
    if requested.is_empty() {
        return MIN_SCORE;
    }
    clamp(requested.iter().sum::<i64>() / requested.len() as i64, max_score)
}

/// LVM proportional fit: `requested_bytes * max / free_bytes`
pub fn capacity_match_score(requested_bytes: u64, free_bytes: u64, max_score: i64) -> i64 {
    if requested_bytes == 0 || free_bytes == 0 {
        return 0;
    }
    let score = (requested_bytes as u128 * max_score.max(0) as u128) / free_bytes as u128;
    clamp(score.min(i64::MAX as u128) as i64, max_score)
}

fn count_match_on(pvcs: &PodPvcs, cache: &NodeStorageCache) -> i64 {
    let kinds: Vec<(usize, usize)> = [VolumeKind::MountPoint, VolumeKind::Device]
        .into_iter()
        .map(|kind| (pvcs.of_kind(kind).len(), cache.free_count(kind)))
        .collect();
    count_match_score(&kinds, MAX_SCORE)
}

fn capacity_match_on(pvcs: &PodPvcs, cache: &NodeStorageCache) -> i64 {
    let requested = pvcs
        .lvm
        .iter()
        .fold(0u64, |sum, p| sum.saturating_add(p.size_bytes));
    capacity_match_score(requested, cache.lvm_free_bytes(), MAX_SCORE)
}

// =============================================================================
// Priority Functions
// =============================================================================

/// Exclusive-resource count match of a node
pub fn count_match(ctx: &SchedulingContext, pod: &Pod, node: &str) -> Result<i64> {
    let mut trace = CallTrace::new(format!("Scheduling[CountMatch] {} on {}", pod_key(pod), node));
    trace.step("Classifying claims");
    let pvcs = classify(pod, ctx.store(), true, false)?;
    if pvcs.mount_points.is_empty() && pvcs.devices.is_empty() {
        return Ok(MIN_SCORE);
    }

    trace.step("Scoring");
    let score = ctx
        .cache()
        .read(node, |cache| count_match_on(&pvcs, cache))
        .ok_or_else(|| Error::NodeCacheNotFound { node: node.to_string() })?;
    debug!("[CountMatch] {} got {} out of {}", node, score, MAX_SCORE);
    trace.log_if_long(ctx.slow_call_threshold());
    Ok(score)
}

/// LVM capacity match of a node
pub fn capacity_match(ctx: &SchedulingContext, pod: &Pod, node: &str) -> Result<i64> {
    let pvcs = classify(pod, ctx.store(), true, true)?;
    if pvcs.lvm.is_empty() {
        return Ok(MIN_SCORE);
    }
    ctx.cache()
        .read(node, |cache| capacity_match_on(&pvcs, cache))
        .ok_or_else(|| Error::NodeCacheNotFound { node: node.to_string() })
}

/// Weighted mean of count match and capacity match
pub fn weighted_score(ctx: &SchedulingContext, pod: &Pod, node: &str) -> Result<i64> {
    let mut trace = CallTrace::new(format!("Scheduling[Priorities] {} on {}", pod_key(pod), node));
    trace.step("Classifying claims");
    let pvcs = classify(pod, ctx.store(), true, true)?;
    if pvcs.is_empty() {
        return Ok(MIN_SCORE);
    }

    trace.step("Scoring");
    let weights = ctx.weights();
    let (count, capacity) = ctx
        .cache()
        .read(node, |cache| (count_match_on(&pvcs, cache), capacity_match_on(&pvcs, cache)))
        .ok_or_else(|| Error::NodeCacheNotFound { node: node.to_string() })?;

    // only functions the pod has claims for take part
    let has_exclusive = !pvcs.mount_points.is_empty() || !pvcs.devices.is_empty();
    let parts = [
        (has_exclusive, count, i64::from(weights.count_match)),
        (!pvcs.lvm.is_empty(), capacity, i64::from(weights.capacity_match)),
    ];
    let (sum, total_weight) = parts
        .iter()
        .filter(|(applies, _, weight)| *applies && *weight > 0)
        .fold((0i64, 0i64), |(sum, total), (_, score, weight)| {
            (sum + score * weight, total + weight)
        });
    let score = if total_weight == 0 {
        MIN_SCORE
    } else {
        clamp(sum / total_weight, MAX_SCORE)
    };

    debug!(
        "{} scored {} for {} (count match {}, capacity match {})",
        node,
        score,
        pod_key(pod),
        count,
        capacity
    );
    trace.log_if_long(ctx.slow_call_threshold());
    if let Some(metrics) = ctx.metrics() {
        metrics.observe_call("priorities", trace.elapsed().as_secs_f64());
    }
    Ok(score)
}
