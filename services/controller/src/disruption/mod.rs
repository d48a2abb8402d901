//! The disruption controller: consolidation and interruption response.
//!
//! Voluntary disruptions replace before they drain: a cheaper replacement
//! node must be up and registered before workloads are moved off the old
//! one. Involuntary interruptions skip all of that, since the instance is
//! already gone.

mod budget;
mod controller;
mod drain;

pub use budget::{DisruptionLedger, DisruptionPermit};
pub use controller::{DisruptionController, DisruptionError, DisruptionTuning};
pub use drain::{DrainResult, Drainer};
