//! Domain Module
//!
//! Core domain types, Kubernetes object helpers, and the ports separating
//! the scheduling core from the cluster.

pub mod k8s;
pub mod ports;
pub mod store;
pub mod types;

pub use ports::*;
pub use store::*;
pub use types::*;
