//! Error types for the local storage scheduler
//!
//! Provides structured error types for the resource ledger, the PVC
//! classifier, the feasibility/scoring engines and the host plumbing
//! around them.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the scheduler
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    // =========================================================================
    // Scheduling Request Errors
    // =========================================================================
    /// A referenced PVC, storage class, snapshot or PV cannot be resolved
    #[error("Failed to resolve {kind} {name}: {reason}")]
    Resolution {
        kind: String,
        name: String,
        reason: String,
    },

    /// Missing or invalid capacity/size fields
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// A local storage class declares a volume type this scheduler does not know
    #[error("Unknown local volume type {kind:?} in storage class {storage_class}")]
    UnknownKind { storage_class: String, kind: String },

    // =========================================================================
    // Resource Ledger Errors
    // =========================================================================
    /// No candidate node has room for a claim being provisioned
    #[error("Insufficient local storage for {pvc}: {reason}")]
    InsufficientStorage { pvc: String, reason: String },

    #[error("Node cache not found: {node}")]
    NodeCacheNotFound { node: String },

    #[error("Resource {resource} on node {node} is already bound to {bound_to}, cannot bind {pvc}")]
    DoubleBinding {
        node: String,
        resource: String,
        bound_to: String,
        pvc: String,
    },

    #[error("Ledger inconsistency: {0}")]
    LedgerInconsistency(String),

    #[error("Malformed change event: {0}")]
    MalformedEvent(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Quantity parse error: {0}")]
    QuantityParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action a caller should take on an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Fail the whole scheduling attempt for the pod
    FailAttempt,
    /// Exclude this node, keep evaluating the others
    SkipNode,
    /// Log the change event and continue with the next one
    SkipEvent,
    /// Retry after a delay
    RetryAfter(Duration),
}

impl Error {
    /// Build a resolution error
    pub fn resolution(kind: &str, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Resolution {
            kind: kind.to_string(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::Resolution { .. }
            | Error::MalformedRequest(_)
            | Error::UnknownKind { .. }
            | Error::InsufficientStorage { .. }
            | Error::QuantityParse(_) => ErrorAction::FailAttempt,

            Error::NodeCacheNotFound { .. } => ErrorAction::SkipNode,

            Error::DoubleBinding { .. }
            | Error::LedgerInconsistency(_)
            | Error::MalformedEvent(_) => ErrorAction::SkipEvent,

            Error::Kube(_) | Error::Io(_) => ErrorAction::RetryAfter(Duration::from_secs(5)),

            _ => ErrorAction::FailAttempt,
        }
    }

    /// Whether the error invalidates the whole pod attempt rather than one node
    pub fn is_pod_fatal(&self) -> bool {
        matches!(self.action(), ErrorAction::FailAttempt)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self.action(), ErrorAction::RetryAfter(_))
    }
}

/// Result type alias for the scheduler
pub type Result<T> = std::result::Result<T, Error>;
