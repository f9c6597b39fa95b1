//! Local Storage Scheduler
//!
//! A kube-scheduler extender for node-local storage. It keeps a per-node
//! ledger of LVM volume groups, exclusive mount points and raw devices, and
//! answers filter and prioritize calls against it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                     kube-scheduler (HTTP extender)                    │
//! └───────────────────────────────┬──────────────────────────────────────┘
//!                                 │ predicates / priorities
//! ┌───────────────────────────────┴──────────────────────────────────────┐
//! │  Extender API (axum)                                                  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Scheduling Core                                                      │
//! │  ┌──────────────┐  ┌─────────────────────┐  ┌─────────────────────┐  │
//! │  │  Classifier  │  │ Feasibility Engine  │  │   Scoring Engine    │  │
//! │  └──────────────┘  └─────────────────────┘  └─────────────────────┘  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Resource Ledger (per-node RwLock, DashMap of nodes)                  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Cluster Sync (kube watchers)  │  NLS Controller  │  Pod Re-trigger   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`api`]: extender HTTP endpoints
//! - [`cache`]: resource ledger and its maintainer
//! - [`scheduler`]: classifier, feasibility and scoring
//! - [`controller`]: NodeLocalStorage reconciler
//! - [`reschedule`]: pending pod re-trigger
//! - [`sync`]: watchers feeding the object store and the ledger
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: core types, Kubernetes helpers and ports
//! - [`config`]: runtime configuration
//! - [`error`]: error types and handling

pub mod api;
pub mod cache;
pub mod config;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod reschedule;
pub mod scheduler;
pub mod sync;

// Re-export commonly used types
pub use api::{ApiServer, ExtenderArgs, ExtenderFilterResult, ExtenderRouter, HostPriority};

pub use cache::{
    ChangePayload, ChangeType, ClusterNodeCache, ExclusiveResource, LedgerEvent,
    LedgerMaintainer, LedgerMetrics, NodeStorageCache, ObjectKind, VolumeGroup,
};

pub use config::{PriorityWeights, SchedulerConfig};

pub use controller::{InitConfigController, KubeNodeLocalStorageApi, NodeLocalStorageApi};

pub use crd::{
    LabelSelector, NodeLocalStorage, NodeLocalStorageInitConfig, NodeLocalStorageSpec,
    NodeLocalStorageStatus, VolumeSnapshot, VolumeSnapshotContent,
};

pub use domain::{InMemoryObjectStore, ObjectStore, PodPatcher, PvcKey, VolumeKind};

pub use error::{Error, ErrorAction, Result};

pub use scheduler::{ClaimExpansion, ClaimPlacement, SchedulingContext, MAX_SCORE, MIN_SCORE};

pub use sync::{ClusterSync, KubePodPatcher};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
