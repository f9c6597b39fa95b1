//! Pending Pod Re-trigger
//!
//! Pods whose local claims are all still unbound can sit unschedulable after
//! the ledger frees up capacity, because nothing about the pod changed. A
//! periodic pass touches a timestamp label on them so the scheduler queues
//! them again.

use crate::config::SchedulerConfig;
use crate::domain::k8s::{pod_key, pvc_phase, CLAIM_PENDING};
use crate::domain::{ObjectStore, PodPatcher, LABEL_RESCHEDULE_TIMESTAMP};
use crate::scheduler::classify;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const POD_PENDING: &str = "Pending";

/// Outcome of one re-trigger pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetriggerSummary {
    pub candidates: usize,
    pub patched: usize,
    pub failed: usize,
}

fn is_unscheduled(pod: &Pod) -> bool {
    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or(POD_PENDING);
    let node = pod.spec.as_ref().and_then(|s| s.node_name.as_deref());
    phase == POD_PENDING
        && node.map_or(true, str::is_empty)
        && pod.metadata.deletion_timestamp.is_none()
}

/// Whether the pod is waiting on local claims that are all unbound
pub fn needs_retrigger(pod: &Pod, store: &dyn ObjectStore) -> bool {
    if !is_unscheduled(pod) {
        return false;
    }
    match classify(pod, store, false, true) {
        Ok(pvcs) => {
            !pvcs.is_empty() && pvcs.iter().all(|p| pvc_phase(&p.claim) == CLAIM_PENDING)
        }
        Err(e) => {
            debug!("Not re-triggering {}: {}", pod_key(pod), e);
            false
        }
    }
}

/// Pods eligible for a re-trigger, in stable order
pub fn select_pending_pods(store: &dyn ObjectStore) -> Vec<Arc<Pod>> {
    let mut pods: Vec<Arc<Pod>> = store
        .pods()
        .into_iter()
        .filter(|pod| needs_retrigger(pod, store))
        .collect();
    pods.sort_by_key(|pod| pod_key(pod));
    pods
}

/// Patch eligible pods until `reschedule_batch_size` patches succeeded.
///
/// Failures are logged and skipped without counting against the batch; the
/// pause between patches spreads the resulting scheduling attempts.
pub async fn retrigger_once(
    store: &dyn ObjectStore,
    patcher: &dyn PodPatcher,
    config: &SchedulerConfig,
) -> RetriggerSummary {
    let pods = select_pending_pods(store);
    let mut summary = RetriggerSummary {
        candidates: pods.len(),
        ..Default::default()
    };

    for (i, pod) in pods.iter().enumerate() {
        if summary.patched >= config.reschedule_batch_size {
            debug!(
                "Re-trigger batch of {} reached, {} pods left for the next pass",
                config.reschedule_batch_size,
                pods.len() - i
            );
            break;
        }
        if i > 0 && !config.reschedule_patch_interval.is_zero() {
            tokio::time::sleep(config.reschedule_patch_interval).await;
        }
        let now = chrono::Utc::now().timestamp().to_string();
        let labels = [(LABEL_RESCHEDULE_TIMESTAMP.to_string(), now.clone())];
        let namespace = pod.namespace().unwrap_or_default();

        match patcher.patch_labels(&namespace, &pod.name_any(), &labels).await {
            Ok(()) => {
                summary.patched += 1;
                info!(
                    "Patched {}={} onto pending pod {}",
                    LABEL_RESCHEDULE_TIMESTAMP,
                    now,
                    pod_key(pod)
                );
            }
            Err(e) => {
                summary.failed += 1;
                error!("Failed to patch pending pod {}: {}", pod_key(pod), e);
            }
        }
    }
    summary
}

/// Re-trigger every `trigger_pending_pod_cycle` until cancelled
pub async fn run_retrigger_loop(
    store: Arc<dyn ObjectStore>,
    patcher: Arc<dyn PodPatcher>,
    config: SchedulerConfig,
    cancel: CancellationToken,
) {
    info!(
        "Pending pod re-trigger started (every {:?}, batch {})",
        config.trigger_pending_pod_cycle, config.reschedule_batch_size
    );
    let mut ticker = tokio::time::interval(config.trigger_pending_pod_cycle);
    // the first tick fires immediately; informers are still syncing then
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let summary = tokio::select! {
                    _ = cancel.cancelled() => break,
                    summary = retrigger_once(store.as_ref(), patcher.as_ref(), &config) => summary,
                };
                if summary.candidates > 0 {
                    debug!("Re-trigger pass: {:?}", summary);
                }
            }
        }
    }
    info!("Pending pod re-trigger stopped");
}
