//! Custom Resource Definitions for the local storage scheduler
//!
//! This module contains all CRD types:
//! - NodeLocalStorage: per-node storage configuration and inventory
//! - NodeLocalStorageInitConfig: cluster-level configuration template
//! - VolumeSnapshot / VolumeSnapshotContent: snapshot lineage lookups

pub mod init_config;
pub mod node_local_storage;
pub mod snapshot;

pub use init_config::*;
pub use node_local_storage::*;
pub use snapshot::*;
