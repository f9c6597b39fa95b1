//! Extender API
//!
//! HTTP surface kube-scheduler talks to:
//! - `POST /scheduler/predicates`: filter nodes by local storage fit
//! - `POST /scheduler/priorities`: rank nodes
//! - `POST /apis/scheduling/...` and `POST /apis/expand/...`: placement and
//!   growth of single claims for the volume provisioner
//! - diagnostics: node ledger, version, metrics, health

pub mod extender;
pub mod rest;
pub mod server;

pub use extender::{ExtenderArgs, ExtenderFilterResult, HostPriority, HostPriorityList};
pub use rest::{ExtenderRouter, INSUFFICIENT_STORAGE};
pub use server::ApiServer;
