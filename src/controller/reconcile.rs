//! Desired state computation
//!
//! Pure functions deriving each node's NodeLocalStorage spec from the
//! cluster-level NodeLocalStorageInitConfig and diffing it against what
//! exists.

use crate::crd::{NodeLocalStorage, NodeLocalStorageInitConfig, NodeLocalStorageSpec};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};

/// Change needed to bring one NodeLocalStorage in line
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    /// No object exists for the node yet
    Create {
        node: String,
        spec: NodeLocalStorageSpec,
    },
    /// The object exists with a different spec
    Update {
        node: String,
        spec: NodeLocalStorageSpec,
    },
    /// The object is up to date
    Noop { node: String },
    /// The node is gone; carries the object name
    Delete { name: String },
}

impl ReconcileAction {
    pub fn node(&self) -> &str {
        match self {
            ReconcileAction::Create { node, .. }
            | ReconcileAction::Update { node, .. }
            | ReconcileAction::Noop { node }
            | ReconcileAction::Delete { name: node } => node,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, ReconcileAction::Noop { .. })
    }
}

/// Spec a node should carry.
///
/// Starts from the global config; every node config whose selector matches
/// the node labels replaces it, later entries winning. Entries without a
/// selector match nothing.
pub fn desired_spec(
    init_config: &NodeLocalStorageInitConfig,
    node: &str,
    labels: &BTreeMap<String, String>,
) -> NodeLocalStorageSpec {
    let global = &init_config.spec.global_config;
    let mut spec = NodeLocalStorageSpec {
        node_name: node.to_string(),
        list_config: global.list_config.clone(),
        resource_to_be_inited: global.resource_to_be_inited.clone(),
    };

    for entry in &init_config.spec.nodes_config {
        let matched = entry
            .selector
            .as_ref()
            .is_some_and(|selector| selector.matches(labels));
        if matched {
            spec.list_config = entry.list_config.clone();
            spec.resource_to_be_inited = entry.resource_to_be_inited.clone();
        }
    }
    spec
}

/// Actions for every node and every orphaned NodeLocalStorage.
///
/// `nodes` maps node name to its labels.
pub fn plan_reconcile(
    init_config: &NodeLocalStorageInitConfig,
    nodes: &BTreeMap<String, BTreeMap<String, String>>,
    existing: &[NodeLocalStorage],
) -> Vec<ReconcileAction> {
    let by_node: BTreeMap<String, &NodeLocalStorage> = existing
        .iter()
        .map(|nls| (nls.node_name(), nls))
        .collect();

    let mut actions: Vec<ReconcileAction> = nodes
        .iter()
        .map(|(node, labels)| {
            let spec = desired_spec(init_config, node, labels);
            match by_node.get(node) {
                None => ReconcileAction::Create {
                    node: node.clone(),
                    spec,
                },
                Some(current) if current.spec != spec => ReconcileAction::Update {
                    node: node.clone(),
                    spec,
                },
                Some(_) => ReconcileAction::Noop { node: node.clone() },
            }
        })
        .collect();

    let known: BTreeSet<&String> = nodes.keys().collect();
    actions.extend(
        by_node
            .iter()
            .filter(|(node, _)| !known.contains(node))
            .map(|(_, nls)| ReconcileAction::Delete {
                name: nls.name_any(),
            }),
    );
    actions
}
