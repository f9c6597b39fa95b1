//! Feasibility Engine
//!
//! Allocation algorithms run against one node's ledger:
//! - [`lvm`]: bin-packing of logical volumes into volume groups
//! - [`exclusive`]: best-fit one-to-one matching of mount points and devices
//! - [`snapshot`]: colocation of read-only snapshot claims with their source

pub mod exclusive;
pub mod lvm;
pub mod snapshot;

pub use exclusive::{allocate_exclusive, ExclusivePlacement};
pub use lvm::{allocate_lvm, LvmPlacement};
pub use snapshot::{check_snapshot_colocation, snapshot_source_node};

/// Outcome of an allocation attempt.
///
/// Infeasibility is an ordinary result, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Allocation<P> {
    /// Every claim was placed
    Fits(Vec<P>),
    /// At least one claim could not be placed
    Infeasible(String),
}

impl<P> Allocation<P> {
    pub fn fits(&self) -> bool {
        matches!(self, Allocation::Fits(_))
    }

    /// Placements of a feasible plan
    pub fn plan(&self) -> Option<&[P]> {
        match self {
            Allocation::Fits(plan) => Some(plan),
            Allocation::Infeasible(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Allocation::Fits(_) => None,
            Allocation::Infeasible(reason) => Some(reason),
        }
    }

    /// Convert each placement of a feasible plan
    pub fn map<Q>(self, f: impl FnMut(P) -> Q) -> Allocation<Q> {
        match self {
            Allocation::Fits(plan) => Allocation::Fits(plan.into_iter().map(f).collect()),
            Allocation::Infeasible(reason) => Allocation::Infeasible(reason),
        }
    }
}
