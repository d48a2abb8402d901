//! Fit simulation for capacity decisions.
//!
//! The simulator is a pure function of its inputs; both the provisioning
//! reconciler and the disruption controller call it speculatively.

mod simulator;

pub use simulator::{
    simulate, Infeasible, InfeasibleReason, PackingPlan, PlanEntry, SimulatorInput,
};
