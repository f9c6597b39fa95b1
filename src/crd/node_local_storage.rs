//! NodeLocalStorage CRD
//!
//! Per-node desired configuration (which volume groups, mount points and
//! devices the node agent should manage) plus the agent-reported inventory
//! the resource ledger is built from.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// NodeLocalStorage CRD
// =============================================================================

/// NodeLocalStorage describes the local storage resources of one node.
/// The spec is written by the init-config controller; the status is
/// reported by the node agent.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "csi.aliyun.com",
    version = "v1alpha1",
    kind = "NodeLocalStorage",
    plural = "nodelocalstorages",
    shortname = "nls",
    status = "NodeLocalStorageStatus",
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.nodeName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct NodeLocalStorageSpec {
    /// Name of the Kubernetes node
    #[serde(default)]
    pub node_name: String,

    /// Which discovered resources the scheduler may allocate from
    #[serde(default)]
    pub list_config: ListConfig,

    /// Resources the node agent should create if missing
    #[serde(default)]
    pub resource_to_be_inited: ResourceToBeInited,
}

// =============================================================================
// Spec Sub-Types
// =============================================================================

/// Include/exclude filters per resource kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListConfig {
    #[serde(default)]
    pub vgs: ResourceFilter,
    #[serde(default)]
    pub mount_points: ResourceFilter,
    #[serde(default)]
    pub devices: ResourceFilter,
}

/// Regex-style name filters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Resources to initialise on the node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceToBeInited {
    #[serde(default)]
    pub vgs: Vec<VgToBeInited>,
    #[serde(default)]
    pub mountpoints: Vec<MountPointToBeInited>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VgToBeInited {
    pub name: String,
    #[serde(default)]
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MountPointToBeInited {
    pub path: String,
    pub device: String,
    #[serde(default)]
    pub fs_type: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Status reported by the node agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeLocalStorageStatus {
    /// Everything discovered on the node
    #[serde(default)]
    pub node_storage_info: NodeStorageInfo,

    /// Names that passed the spec's list config
    #[serde(default)]
    pub filtered_storage_info: FilteredStorageInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeStorageInfo {
    #[serde(default)]
    pub volume_groups: Vec<VolumeGroupInfo>,
    #[serde(default)]
    pub mount_points: Vec<MountPointInfo>,
    #[serde(default)]
    pub devices: Vec<DeviceInfo>,
}

/// An LVM volume group as reported by the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupInfo {
    pub name: String,
    #[serde(default)]
    pub physical_volumes: Vec<String>,
    /// Raw size in bytes
    #[serde(default)]
    pub total: u64,
    /// Bytes the scheduler may allocate
    #[serde(default)]
    pub allocatable: u64,
    #[serde(default)]
    pub available: u64,
}

/// A mount point as reported by the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MountPointInfo {
    /// Mount path
    pub name: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub available: u64,
    #[serde(default)]
    pub fs_type: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub media_type: Option<String>,
}

/// A raw block device as reported by the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Device path
    pub name: String,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilteredStorageInfo {
    #[serde(default)]
    pub volume_groups: Vec<String>,
    #[serde(default)]
    pub mount_points: Vec<String>,
    #[serde(default)]
    pub devices: Vec<String>,
}

impl NodeLocalStorage {
    /// Node this object describes, falling back to the object name
    pub fn node_name(&self) -> String {
        if self.spec.node_name.is_empty() {
            self.metadata.name.clone().unwrap_or_default()
        } else {
            self.spec.node_name.clone()
        }
    }
}
