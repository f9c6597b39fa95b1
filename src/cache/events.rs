//! Ledger Events
//!
//! Events emitted by the cluster ledger whenever an allocation or an
//! inventory changes, for metrics and debugging consumers.

use crate::domain::{PvcKey, VolumeKind};
use serde::{Deserialize, Serialize};

/// Events emitted by the cluster ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// A node entry was created
    NodeAdded { node: String },

    /// A node entry was dropped
    NodeRemoved { node: String },

    /// A node's inventory was rebuilt from its agent report
    InventoryUpdated {
        node: String,
        volume_groups: usize,
        mount_points: usize,
        devices: usize,
    },

    /// A logical volume was recorded or resized
    VolumeAllocated {
        node: String,
        volume_group: String,
        pvc: PvcKey,
        size_bytes: u64,
    },

    /// A logical volume was released
    VolumeReleased {
        node: String,
        volume_group: String,
        pvc: PvcKey,
        size_bytes: u64,
    },

    /// An exclusive resource was bound to a PVC
    ResourceBound {
        node: String,
        kind: VolumeKind,
        resource: String,
        pvc: PvcKey,
    },

    /// An exclusive resource was freed
    ResourceReleased {
        node: String,
        kind: VolumeKind,
        resource: String,
        pvc: PvcKey,
    },
}

impl LedgerEvent {
    /// Node the event belongs to
    pub fn node(&self) -> &str {
        match self {
            LedgerEvent::NodeAdded { node }
            | LedgerEvent::NodeRemoved { node }
            | LedgerEvent::InventoryUpdated { node, .. }
            | LedgerEvent::VolumeAllocated { node, .. }
            | LedgerEvent::VolumeReleased { node, .. }
            | LedgerEvent::ResourceBound { node, .. }
            | LedgerEvent::ResourceReleased { node, .. } => node,
        }
    }

    /// PVC the event concerns, if any
    pub fn pvc(&self) -> Option<&PvcKey> {
        match self {
            LedgerEvent::VolumeAllocated { pvc, .. }
            | LedgerEvent::VolumeReleased { pvc, .. }
            | LedgerEvent::ResourceBound { pvc, .. }
            | LedgerEvent::ResourceReleased { pvc, .. } => Some(pvc),
            _ => None,
        }
    }

    /// Check if this is a node-level event
    pub fn is_node_event(&self) -> bool {
        matches!(
            self,
            LedgerEvent::NodeAdded { .. }
                | LedgerEvent::NodeRemoved { .. }
                | LedgerEvent::InventoryUpdated { .. }
        )
    }
}
