//! Scheduler extender wire types
//!
//! JSON bodies exchanged with kube-scheduler's HTTP extender client.

use k8s_openapi::api::core::v1::{Node, Pod};

type NodeList = k8s_openapi::List<Node>;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Arguments of a filter or prioritize call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtenderArgs {
    pub pod: Pod,
    /// Full node objects, sent when the extender is not node-cache capable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeList>,
    /// Node names, sent when the extender is node-cache capable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodenames: Option<Vec<String>>,
}

impl ExtenderArgs {
    /// Candidate node names in request order
    pub fn node_names(&self) -> Vec<String> {
        match (&self.nodenames, &self.nodes) {
            (Some(names), _) => names.clone(),
            (None, Some(list)) => list.items.iter().map(|n| n.name_any()).collect(),
            (None, None) => Vec::new(),
        }
    }
}

/// Reply to a filter call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtenderFilterResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeList>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "nodenames")]
    pub node_names: Option<Vec<String>>,
    /// Node name to the reason it was filtered out
    #[serde(default)]
    pub failed_nodes: BTreeMap<String, String>,
    /// Set when the whole call failed
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Score of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPriority {
    pub host: String,
    pub score: i64,
}

pub type HostPriorityList = Vec<HostPriority>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_accept_either_node_form() {
        let raw = r#"{
            "pod": {"metadata": {"name": "app", "namespace": "default"}},
            "nodenames": ["node-1", "node-2"]
        }"#;
        let args: ExtenderArgs = serde_json::from_str(raw).unwrap();
        assert_eq!(args.node_names(), vec!["node-1", "node-2"]);

        let raw = r#"{
            "pod": {"metadata": {"name": "app"}},
            "nodes": {"items": [{"metadata": {"name": "node-3"}}]}
        }"#;
        let args: ExtenderArgs = serde_json::from_str(raw).unwrap();
        assert_eq!(args.node_names(), vec!["node-3"]);
    }

    #[test]
    fn test_filter_result_shape() {
        let result = ExtenderFilterResult {
            node_names: Some(vec!["node-1".into()]),
            failed_nodes: BTreeMap::from([("node-2".into(), "insufficient".into())]),
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["nodenames"][0], "node-1");
        assert_eq!(json["failedNodes"]["node-2"], "insufficient");
        assert!(json.get("error").is_none());
    }
}
