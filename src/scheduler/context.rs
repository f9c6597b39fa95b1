//! Scheduling Context
//!
//! Process-wide handle threading the resource ledger and the object store
//! through the predicate and priority functions.

use super::provision::{self, ClaimExpansion, ClaimPlacement};
use super::{predicates, priorities};
use crate::cache::{ClusterNodeCache, LedgerMetrics, NodeStorageCache};
use crate::config::{PriorityWeights, SchedulerConfig};
use crate::domain::ObjectStore;
use crate::error::Result;
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;
use std::time::Duration;

/// Shared state of a running extender
pub struct SchedulingContext {
    cache: Arc<ClusterNodeCache>,
    store: Arc<dyn ObjectStore>,
    weights: PriorityWeights,
    slow_call_threshold: Duration,
    metrics: Option<Arc<LedgerMetrics>>,
}

impl std::fmt::Debug for SchedulingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulingContext")
            .field("nodes", &self.cache.len())
            .field("weights", &self.weights)
            .finish()
    }
}

impl SchedulingContext {
    pub fn new(
        cache: Arc<ClusterNodeCache>,
        store: Arc<dyn ObjectStore>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            cache,
            store,
            weights: config.weights.clone(),
            slow_call_threshold: config.slow_call_threshold,
            metrics: None,
        }
    }

    /// Record call durations in the given metrics
    pub fn with_metrics(mut self, metrics: Arc<LedgerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &Arc<ClusterNodeCache> {
        &self.cache
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn weights(&self) -> &PriorityWeights {
        &self.weights
    }

    pub fn slow_call_threshold(&self) -> Duration {
        self.slow_call_threshold
    }

    pub fn metrics(&self) -> Option<&Arc<LedgerMetrics>> {
        self.metrics.as_ref()
    }

    // =========================================================================
    // Decision Operations
    // =========================================================================

    /// Whether the node's local storage can host the pod's claims
    pub fn fits(&self, pod: &Pod, node: &str) -> Result<bool> {
        predicates::capacity_predicate(self, pod, node)
    }

    /// Exclusive-resource count match score of the node
    pub fn score(&self, pod: &Pod, node: &str) -> Result<i64> {
        priorities::count_match(self, pod, node)
    }

    /// Weighted combination of all priority functions
    pub fn prioritize(&self, pod: &Pod, node: &str) -> Result<i64> {
        priorities::weighted_score(self, pod, node)
    }

    /// Choose and record where a pending claim is provisioned
    pub fn schedule_claim(&self, namespace: &str, name: &str, node: Option<&str>) -> Result<ClaimPlacement> {
        provision::schedule_claim(self, namespace, name, node)
    }

    /// Record the new size of a bound claim being expanded
    pub fn expand_claim(&self, namespace: &str, name: &str) -> Result<ClaimExpansion> {
        provision::expand_claim(self, namespace, name)
    }

    /// Point-in-time copy of a node's ledger
    pub fn node_cache(&self, node: &str) -> Option<NodeStorageCache> {
        self.cache.snapshot(node)
    }
}
