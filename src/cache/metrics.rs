//! Ledger Metrics
//!
//! Prometheus gauges mirroring per-node capacity and allocation, plus
//! counters for change events and scheduling calls. Metrics live in their
//! own registry so several ledgers can coexist in one process.

use super::node_cache::NodeStorageCache;
use crate::domain::VolumeKind;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::collections::{BTreeSet, HashMap};

/// Metric families exported by the scheduler
pub struct LedgerMetrics {
    registry: Registry,
    vg_total_bytes: GaugeVec,
    vg_allocated_bytes: GaugeVec,
    exclusive_total: GaugeVec,
    exclusive_free: GaugeVec,
    change_events: IntCounterVec,
    call_duration: HistogramVec,
    /// Volume groups with live series, per node
    exported_vgs: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl std::fmt::Debug for LedgerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerMetrics").finish_non_exhaustive()
    }
}

fn metric_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}

impl LedgerMetrics {
    /// Create and register all metric families
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let vg_total_bytes = GaugeVec::new(
            Opts::new(
                "local_storage_volume_group_total_bytes",
                "Schedulable capacity of a volume group",
            ),
            &["node", "vg"],
        )
        .map_err(metric_error)?;
        let vg_allocated_bytes = GaugeVec::new(
            Opts::new(
                "local_storage_volume_group_allocated_bytes",
                "Bytes allocated to logical volumes in a volume group",
            ),
            &["node", "vg"],
        )
        .map_err(metric_error)?;
        let exclusive_total = GaugeVec::new(
            Opts::new(
                "local_storage_exclusive_resources_total",
                "Exclusive resources known on a node",
            ),
            &["node", "kind"],
        )
        .map_err(metric_error)?;
        let exclusive_free = GaugeVec::new(
            Opts::new(
                "local_storage_exclusive_resources_free",
                "Exclusive resources still free on a node",
            ),
            &["node", "kind"],
        )
        .map_err(metric_error)?;
        let change_events = IntCounterVec::new(
            Opts::new(
                "local_storage_ledger_changes_total",
                "Change events applied to the ledger",
            ),
            &["kind", "change", "outcome"],
        )
        .map_err(metric_error)?;
        let call_duration = HistogramVec::new(
            HistogramOpts::new(
                "local_storage_scheduler_call_duration_seconds",
                "Duration of extender predicate and priority calls",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            &["call"],
        )
        .map_err(metric_error)?;

        registry
            .register(Box::new(vg_total_bytes.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(vg_allocated_bytes.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(exclusive_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(exclusive_free.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(change_events.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(call_duration.clone()))
            .map_err(metric_error)?;

        Ok(Self {
            registry,
            vg_total_bytes,
            vg_allocated_bytes,
            exclusive_total,
            exclusive_free,
            change_events,
            call_duration,
            exported_vgs: Mutex::new(HashMap::new()),
        })
    }

    /// Refresh the capacity gauges of one node
    pub fn observe_node(&self, cache: &NodeStorageCache) {
        let node = cache.node_name.as_str();
        let current: BTreeSet<String> = cache.volume_groups.keys().cloned().collect();
        let previous = self
            .exported_vgs
            .lock()
            .insert(node.to_string(), current.clone())
            .unwrap_or_default();
        for gone in previous.difference(&current) {
            self.remove_vg_series(node, gone);
        }

        for vg in cache.volume_groups.values() {
            self.vg_total_bytes
                .with_label_values(&[node, &vg.name])
                .set(vg.total_bytes as f64);
            self.vg_allocated_bytes
                .with_label_values(&[node, &vg.name])
                .set(vg.allocated_bytes as f64);
        }
        for kind in [VolumeKind::MountPoint, VolumeKind::Device] {
            let label = kind.to_string();
            self.exclusive_total
                .with_label_values(&[node, &label])
                .set(cache.exclusive(kind).len() as f64);
            self.exclusive_free
                .with_label_values(&[node, &label])
                .set(cache.free_count(kind) as f64);
        }
    }

    fn remove_vg_series(&self, node: &str, vg: &str) {
        let _ = self.vg_total_bytes.remove_label_values(&[node, vg]);
        let _ = self.vg_allocated_bytes.remove_label_values(&[node, vg]);
    }

    /// Drop every series of a node
    pub fn forget_node(&self, cache: &NodeStorageCache) {
        let node = cache.node_name.as_str();
        let exported = self.exported_vgs.lock().remove(node).unwrap_or_default();
        for vg in exported.iter().chain(cache.volume_groups.keys()) {
            self.remove_vg_series(node, vg);
        }
        for kind in [VolumeKind::MountPoint, VolumeKind::Device] {
            let label = kind.to_string();
            let _ = self.exclusive_total.remove_label_values(&[node, &label]);
            let _ = self.exclusive_free.remove_label_values(&[node, &label]);
        }
    }

    /// Count an applied change event
    pub fn record_change(&self, kind: &str, change: &str, applied: bool) {
        let outcome = if applied { "applied" } else { "skipped" };
        self.change_events
            .with_label_values(&[kind, change, outcome])
            .inc();
    }

    /// Record the duration of an extender call
    pub fn observe_call(&self, call: &str, seconds: f64) {
        self.call_duration.with_label_values(&[call]).observe(seconds);
    }

    /// Encode all families in the text exposition format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metric_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}
