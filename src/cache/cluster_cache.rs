//! Cluster Node Cache
//!
//! The in-memory resource ledger for every node in the cluster. Each node's
//! ledger sits behind its own read/write lock so predicate calls for
//! different nodes never contend, while change events for one node are
//! serialized.

use super::events::LedgerEvent;
use super::node_cache::NodeStorageCache;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared handle to one node's ledger
pub type NodeHandle = Arc<RwLock<NodeStorageCache>>;

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct LedgerStats {
    nodes_added: AtomicU64,
    nodes_removed: AtomicU64,
    mutations: AtomicU64,
}

/// Snapshot of ledger statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStatsSnapshot {
    pub nodes: usize,
    pub nodes_added: u64,
    pub nodes_removed: u64,
    pub mutations: u64,
}

// =============================================================================
// Cluster Node Cache
// =============================================================================

/// Concurrent map from node name to that node's ledger
pub struct ClusterNodeCache {
    nodes: DashMap<String, NodeHandle>,
    stats: LedgerStats,
    event_sender: broadcast::Sender<LedgerEvent>,
}

impl std::fmt::Debug for ClusterNodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterNodeCache")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl ClusterNodeCache {
    /// Create an empty ledger
    pub fn new(event_capacity: usize) -> Arc<Self> {
        let (event_sender, _) = broadcast::channel(event_capacity.max(1));
        Arc::new(Self {
            nodes: DashMap::new(),
            stats: LedgerStats::default(),
            event_sender,
        })
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.event_sender.subscribe()
    }

    pub(crate) fn emit(&self, event: LedgerEvent) {
        // no receivers is fine
        let _ = self.event_sender.send(event);
    }

    /// Log every ledger event until cancelled, returning how many were seen
    pub async fn log_events(self: Arc<Self>, cancel: CancellationToken) -> u64 {
        let mut events = self.subscribe();
        let mut seen = 0u64;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => {
                        seen += 1;
                        if event.is_node_event() {
                            info!("Ledger of {}: {:?}", event.node(), event);
                        } else if let Some(pvc) = event.pvc() {
                            debug!("Ledger of {} for {}: {:?}", event.node(), pvc, event);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Ledger event log fell behind, {} events dropped", missed);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        seen
    }

    /// Handle to a node's ledger.
    ///
    /// The map shard lock is released before the handle is returned, so the
    /// caller may hold the node lock as long as needed.
    pub fn get(&self, node: &str) -> Option<NodeHandle> {
        self.nodes.get(node).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    /// Get or create a node's ledger
    pub fn ensure_node(&self, node: &str) -> NodeHandle {
        if let Some(handle) = self.get(node) {
            return handle;
        }
        let mut created = false;
        let handle = self
            .nodes
            .entry(node.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(RwLock::new(NodeStorageCache::new(node)))
            })
            .value()
            .clone();
        if created {
            self.stats.nodes_added.fetch_add(1, Ordering::Relaxed);
            self.emit(LedgerEvent::NodeAdded {
                node: node.to_string(),
            });
        }
        handle
    }

    /// Insert a fully built ledger, replacing any existing one
    pub fn insert(&self, cache: NodeStorageCache) -> NodeHandle {
        let node = cache.node_name.clone();
        let handle = Arc::new(RwLock::new(cache));
        if self.nodes.insert(node.clone(), handle.clone()).is_none() {
            self.stats.nodes_added.fetch_add(1, Ordering::Relaxed);
            self.emit(LedgerEvent::NodeAdded { node });
        }
        handle
    }

    /// Drop a node's ledger
    pub fn remove_node(&self, node: &str) -> Option<NodeStorageCache> {
        let (_, handle) = self.nodes.remove(node)?;
        self.stats.nodes_removed.fetch_add(1, Ordering::Relaxed);
        self.emit(LedgerEvent::NodeRemoved {
            node: node.to_string(),
        });
        let cache = handle.read().clone();
        Some(cache)
    }

    /// Run a closure under a node's read lock
    pub fn read<R>(&self, node: &str, f: impl FnOnce(&NodeStorageCache) -> R) -> Option<R> {
        let handle = self.get(node)?;
        let guard = handle.read();
        Some(f(&guard))
    }

    /// Run a closure under a node's write lock
    pub fn write<R>(&self, node: &str, f: impl FnOnce(&mut NodeStorageCache) -> R) -> Option<R> {
        let handle = self.get(node)?;
        let mut guard = handle.write();
        self.stats.mutations.fetch_add(1, Ordering::Relaxed);
        Some(f(&mut guard))
    }

    /// Point-in-time copy of a node's ledger
    pub fn snapshot(&self, node: &str) -> Option<NodeStorageCache> {
        self.read(node, |cache| cache.clone())
    }

    /// Names of all nodes, sorted
    pub fn node_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get ledger statistics
    pub fn stats(&self) -> LedgerStatsSnapshot {
        LedgerStatsSnapshot {
            nodes: self.nodes.len(),
            nodes_added: self.stats.nodes_added.load(Ordering::Relaxed),
            nodes_removed: self.stats.nodes_removed.load(Ordering::Relaxed),
            mutations: self.stats.mutations.load(Ordering::Relaxed),
        }
    }
}
