//! NodeLocalStorage Controller
//!
//! Keeps one NodeLocalStorage per node in line with the cluster-level
//! NodeLocalStorageInitConfig. Nodes and existing objects are read from the
//! informer-fed [`ObjectStore`]; writes go through [`NodeLocalStorageApi`].
//!
//! ```text
//! InitConfig ──┐
//! Nodes ───────┼──► plan_reconcile ──► Create / Update / Delete ──► API server
//! NLS objects ─┘
//! ```

pub mod reconcile;

pub use reconcile::{desired_spec, plan_reconcile, ReconcileAction};

use crate::crd::{NodeLocalStorage, NodeLocalStorageInitConfig, NodeLocalStorageSpec};
use crate::domain::ObjectStore;
use crate::error::Result;
use async_trait::async_trait;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Write Port
// =============================================================================

/// Writes NodeLocalStorage objects and reads the init config
#[async_trait]
pub trait NodeLocalStorageApi: Send + Sync {
    async fn init_config(&self, name: &str) -> Result<Option<NodeLocalStorageInitConfig>>;

    async fn create(&self, node: &str, spec: &NodeLocalStorageSpec) -> Result<()>;

    async fn update(&self, node: &str, spec: &NodeLocalStorageSpec) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;
}

/// API server backed implementation
pub struct KubeNodeLocalStorageApi {
    client: Client,
}

impl KubeNodeLocalStorageApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeLocalStorageApi for KubeNodeLocalStorageApi {
    async fn init_config(&self, name: &str) -> Result<Option<NodeLocalStorageInitConfig>> {
        let api: Api<NodeLocalStorageInitConfig> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn create(&self, node: &str, spec: &NodeLocalStorageSpec) -> Result<()> {
        let api: Api<NodeLocalStorage> = Api::all(self.client.clone());
        api.create(&PostParams::default(), &NodeLocalStorage::new(node, spec.clone()))
            .await?;
        Ok(())
    }

    async fn update(&self, node: &str, spec: &NodeLocalStorageSpec) -> Result<()> {
        let api: Api<NodeLocalStorage> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "spec": spec });
        api.patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let api: Api<NodeLocalStorage> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Outcome counts of one reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl ReconcileSummary {
    /// Whether the pass attempted any write
    pub fn changed(&self) -> bool {
        self.created + self.updated + self.deleted + self.failed > 0
    }
}

/// Periodic reconciler of NodeLocalStorage objects
pub struct InitConfigController {
    store: Arc<dyn ObjectStore>,
    api: Arc<dyn NodeLocalStorageApi>,
    config_name: String,
    resync: Duration,
}

impl InitConfigController {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        api: Arc<dyn NodeLocalStorageApi>,
        config_name: impl Into<String>,
        resync: Duration,
    ) -> Self {
        Self {
            store,
            api,
            config_name: config_name.into(),
            resync,
        }
    }

    /// One pass over every node.
    ///
    /// A missing init config leaves existing objects untouched. Failures of
    /// individual writes are logged and counted; the pass continues.
    pub async fn reconcile_once(&self) -> Result<ReconcileSummary> {
        let Some(init_config) = self.api.init_config(&self.config_name).await? else {
            debug!("NodeLocalStorageInitConfig {} not found, skipping", self.config_name);
            return Ok(ReconcileSummary::default());
        };

        let nodes: BTreeMap<String, BTreeMap<String, String>> = self
            .store
            .nodes()
            .iter()
            .filter(|node| node.metadata.deletion_timestamp.is_none())
            .map(|node| (node.name_any(), node.labels().clone()))
            .collect();
        let existing: Vec<NodeLocalStorage> = self
            .store
            .node_local_storages()
            .iter()
            .map(|nls| nls.as_ref().clone())
            .collect();

        let mut summary = ReconcileSummary::default();
        for action in plan_reconcile(&init_config, &nodes, &existing) {
            let outcome = match &action {
                ReconcileAction::Noop { .. } => {
                    summary.unchanged += 1;
                    continue;
                }
                ReconcileAction::Create { node, spec } => self.api.create(node, spec).await,
                ReconcileAction::Update { node, spec } => self.api.update(node, spec).await,
                ReconcileAction::Delete { name } => self.api.delete(name).await,
            };

            match outcome {
                Ok(()) => {
                    info!("NodeLocalStorage {}: {} applied", action.node(), kind_of(&action));
                    match action {
                        ReconcileAction::Create { .. } => summary.created += 1,
                        ReconcileAction::Update { .. } => summary.updated += 1,
                        _ => summary.deleted += 1,
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!("NodeLocalStorage {}: {} failed: {}", action.node(), kind_of(&action), e);
                }
            }
        }
        Ok(summary)
    }

    /// Reconcile every resync period until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "NodeLocalStorage controller started (config {}, every {:?})",
            self.config_name, self.resync
        );
        let mut ticker = tokio::time::interval(self.resync);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.reconcile_once().await {
                        Ok(summary) if summary.changed() => debug!("Reconcile pass: {:?}", summary),
                        Ok(_) => {}
                        Err(e) => error!("Reconcile pass failed: {}", e),
                    }
                }
            }
        }
        info!("NodeLocalStorage controller stopped");
    }
}

fn kind_of(action: &ReconcileAction) -> &'static str {
    match action {
        ReconcileAction::Create { .. } => "create",
        ReconcileAction::Update { .. } => "update",
        ReconcileAction::Noop { .. } => "noop",
        ReconcileAction::Delete { .. } => "delete",
    }
}
