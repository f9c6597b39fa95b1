//! Extender HTTP Handlers
//!
//! Filter and prioritize endpoints called by kube-scheduler, plus the
//! diagnostic routes of the extender.

use super::extender::{ExtenderArgs, ExtenderFilterResult, HostPriority, HostPriorityList};
use crate::cache::LedgerMetrics;
use crate::domain::k8s::pod_key;
use crate::error::{Error, Result};
use crate::scheduler::SchedulingContext;
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures::future::join_all;
use k8s_openapi::api::core::v1::{Node, Pod};

type NodeList = k8s_openapi::List<Node>;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Reason reported for nodes without room for the pod's claims
pub const INSUFFICIENT_STORAGE: &str = "insufficient local storage";

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub name: String,
    pub version: String,
}

// =============================================================================
// Router
// =============================================================================

/// Extender router builder
pub struct ExtenderRouter {
    ctx: Arc<SchedulingContext>,
    metrics: Arc<LedgerMetrics>,
}

impl ExtenderRouter {
    pub fn new(ctx: Arc<SchedulingContext>, metrics: Arc<LedgerMetrics>) -> Self {
        Self { ctx, metrics }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            ctx: self.ctx,
            metrics: self.metrics,
        };

        Router::new()
            // Extender endpoints
            .route("/scheduler/predicates", post(predicates))
            .route("/scheduler/priorities", post(priorities))
            // Provisioner endpoints
            .route(
                "/apis/scheduling/:namespace/persistentvolumeclaims/:name",
                post(schedule_claim),
            )
            .route(
                "/apis/expand/:namespace/persistentvolumeclaims/:name",
                post(expand_claim),
            )
            // Diagnostics
            .route("/cache/nodes/:name", get(node_cache))
            .route("/version", get(version))
            .route("/metrics", get(metrics))
            .route("/healthz", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

#[derive(Clone)]
struct AppState {
    ctx: Arc<SchedulingContext>,
    metrics: Arc<LedgerMetrics>,
}

// =============================================================================
// Node Fan-out
// =============================================================================

/// Run `eval` for every node on the blocking pool, keeping request order
async fn per_node<T, F>(ctx: &Arc<SchedulingContext>, pod: &Arc<Pod>, nodes: Vec<String>, eval: F) -> Vec<(String, Result<T>)>
where
    T: Send + 'static,
    F: Fn(&SchedulingContext, &Pod, &str) -> Result<T> + Copy + Send + 'static,
{
    let tasks = nodes.into_iter().map(|node| {
        let ctx = Arc::clone(ctx);
        let pod = Arc::clone(pod);
        async move {
            let task_node = node.clone();
            let result = tokio::task::spawn_blocking(move || eval(ctx.as_ref(), pod.as_ref(), task_node.as_str()))
                .await
                .unwrap_or_else(|e| Err(Error::Internal(format!("evaluation task failed: {}", e))));
            (node, result)
        }
    });
    join_all(tasks).await
}

// =============================================================================
// Handlers
// =============================================================================

/// Filter candidate nodes
async fn predicates(
    State(state): State<AppState>,
    Json(args): Json<ExtenderArgs>,
) -> impl IntoResponse {
    let nodes = args.node_names();
    let pod = Arc::new(args.pod.clone());
    debug!("Filtering {} nodes for pod {}", nodes.len(), pod_key(&pod));

    let results = per_node(&state.ctx, &pod, nodes, |ctx, pod, node| ctx.fits(pod, node)).await;
    let result = filter_result(&args, results);
    if !result.error.is_empty() {
        error!("Filter for pod {} failed: {}", pod_key(&pod), result.error);
    }
    (StatusCode::OK, Json(result))
}

fn filter_result(args: &ExtenderArgs, results: Vec<(String, Result<bool>)>) -> ExtenderFilterResult {
    let mut result = ExtenderFilterResult::default();
    let mut passed = Vec::new();

    for (node, outcome) in results {
        match outcome {
            Ok(true) => passed.push(node),
            Ok(false) => {
                result.failed_nodes.insert(node, INSUFFICIENT_STORAGE.to_string());
            }
            Err(e) if e.is_pod_fatal() => {
                result.error = e.to_string();
                result.failed_nodes.clear();
                passed.clear();
                break;
            }
            Err(e) => {
                result.failed_nodes.insert(node, e.to_string());
            }
        }
    }

    if args.nodenames.is_some() || args.nodes.is_none() {
        result.node_names = Some(passed);
    } else if let Some(list) = &args.nodes {
        let keep: BTreeSet<&str> = passed.iter().map(String::as_str).collect();
        result.nodes = Some(NodeList {
            items: list
                .items
                .iter()
                .filter(|n| keep.contains(n.name_any().as_str()))
                .cloned()
                .collect(),
            metadata: list.metadata.clone(),
        });
    }
    result
}

/// Score candidate nodes
async fn priorities(
    State(state): State<AppState>,
    Json(args): Json<ExtenderArgs>,
) -> Response {
    let nodes = args.node_names();
    let pod = Arc::new(args.pod);

    let results = per_node(&state.ctx, &pod, nodes, |ctx, pod, node| ctx.prioritize(pod, node)).await;
    let mut scores: HostPriorityList = Vec::with_capacity(results.len());
    for (host, outcome) in results {
        match outcome {
            Ok(score) => scores.push(HostPriority { host, score }),
            Err(e) if e.is_pod_fatal() => {
                error!("Prioritize for pod {} failed: {}", pod_key(&pod), e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiErrorResponse {
                        error: "prioritize_failed".into(),
                        message: e.to_string(),
                    }),
                )
                    .into_response();
            }
            Err(e) => {
                warn!("Scoring {} for pod {}: {}", host, pod_key(&pod), e);
                scores.push(HostPriority {
                    host,
                    score: crate::scheduler::MIN_SCORE,
                });
            }
        }
    }
    (StatusCode::OK, Json(scores)).into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlacementQuery {
    node_name: Option<String>,
}

fn provisioner_response<T: Serialize>(error_code: &str, key: &str, result: Result<T>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => {
            error!("{} for {}: {}", error_code, key, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiErrorResponse {
                    error: error_code.into(),
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Place a pending claim, optionally on a given node
async fn schedule_claim(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(query): Query<PlacementQuery>,
) -> Response {
    let key = format!("{}/{}", namespace, name);
    debug!("Placing claim {} (node {:?})", key, query.node_name);
    let ctx = state.ctx.clone();
    let result = tokio::task::spawn_blocking(move || {
        let node = query.node_name.as_deref().filter(|n| !n.is_empty());
        ctx.schedule_claim(&namespace, &name, node)
    })
    .await
    .unwrap_or_else(|e| Err(Error::Internal(format!("placement task failed: {}", e))));
    provisioner_response("scheduling_failed", &key, result)
}

/// Grow the recorded volume of a bound claim
async fn expand_claim(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let key = format!("{}/{}", namespace, name);
    let ctx = state.ctx.clone();
    let result = tokio::task::spawn_blocking(move || ctx.expand_claim(&namespace, &name))
        .await
        .unwrap_or_else(|e| Err(Error::Internal(format!("expansion task failed: {}", e))));
    provisioner_response("expansion_failed", &key, result)
}

/// Ledger of one node
async fn node_cache(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.ctx.node_cache(&name) {
        Some(cache) => (StatusCode::OK, Json(cache)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiErrorResponse {
                error: "not_found".into(),
                message: format!("Node {} not found", name),
            }),
        )
            .into_response(),
    }
}

async fn version() -> impl IntoResponse {
    Json(VersionResponse {
        name: crate::NAME.to_string(),
        version: crate::VERSION.to_string(),
    })
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok((content_type, body)) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Log the routes once at startup
pub(crate) fn log_routes() {
    for route in [
        "POST /scheduler/predicates",
        "POST /scheduler/priorities",
        "POST /apis/scheduling/:namespace/persistentvolumeclaims/:name",
        "POST /apis/expand/:namespace/persistentvolumeclaims/:name",
        "GET /cache/nodes/:name",
        "GET /version",
        "GET /metrics",
        "GET /healthz",
    ] {
        info!("  {}", route);
    }
}
