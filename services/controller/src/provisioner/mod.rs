//! The provisioning reconciler: converges fleet capacity toward demand.
//!
//! Each cycle observes unplaced workloads, simulates a packing against the
//! current catalog snapshot, and commits at most one launch decision. The
//! same cycle also absorbs registration signals, fails claims that missed
//! their registration deadline, and collects old failed claims.

mod reconciler;
mod worker;

pub use reconciler::{
    CycleSummary, LaunchSummary, ProvisionError, ProvisionTuning, ProvisioningReconciler,
};
pub use worker::ProvisionWorker;
