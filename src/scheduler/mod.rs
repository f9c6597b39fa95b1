//! Scheduling Core
//!
//! Classifier, Feasibility Engine and Scoring Engine operating over the
//! resource ledger, bundled behind [`SchedulingContext`]. [`provision`]
//! answers the volume provisioner's placement and expansion requests.
//!
//! ```text
//! pod ──► classify ──► LVM ──► mount points ──► devices ──► snapshots ──► fits
//!                 └──────────────► count match / capacity match ──────────► score
//! ```

pub mod algo;
pub mod classifier;
pub mod context;
pub mod predicates;
pub mod priorities;
pub mod provision;
pub mod trace;

#[cfg(test)]
pub(crate) mod testutil;

pub use algo::{Allocation, ExclusivePlacement, LvmPlacement};
pub use classifier::{classify, PodPvcs, PvcRequest};
pub use context::SchedulingContext;
pub use priorities::{MAX_SCORE, MIN_SCORE};
pub use provision::{ClaimExpansion, ClaimPlacement};
