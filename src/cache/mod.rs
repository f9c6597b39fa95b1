//! Resource Ledger
//!
//! In-memory record of every node's local storage and its allocation state.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      ClusterNodeCache                          │
//! │        DashMap<node, Arc<RwLock<NodeStorageCache>>>            │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐ │
//! │  │ VolumeGroups │  │ MountPoints  │  │       Devices        │ │
//! │  │  (shared)    │  │ (exclusive)  │  │     (exclusive)      │ │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘ │
//! ├───────────────────────────────────────────────────────────────┤
//! │ LedgerMaintainer::apply_change  ◄── Node / PV / PVC / NLS     │
//! │ LedgerEvent broadcast ──► diagnostics     LedgerMetrics       │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Readers take the read lock of one node, writers its write lock. Node
//! join and leave go through the concurrent map.

pub mod cluster_cache;
pub mod events;
pub mod maintainer;
pub mod metrics;
pub mod node_cache;

pub use cluster_cache::{ClusterNodeCache, LedgerStatsSnapshot, NodeHandle};
pub use events::LedgerEvent;
pub use maintainer::{ChangePayload, ChangeType, LedgerMaintainer, ObjectKind};
pub use metrics::LedgerMetrics;
pub use node_cache::{ExclusiveResource, NodeStorageCache, VolumeGroup};
