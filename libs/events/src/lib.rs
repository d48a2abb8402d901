//! # flotilla-events
//!
//! Event type definitions and the fleet event bus for the flotilla controller.
//!
//! ## Design Principles
//!
//! - Events are immutable records of observations, never commands
//! - Every event carries a globally monotonic sequence number (`EventSeq`)
//! - Delivery is ordered and at-least-once: a consumer must acknowledge each
//!   event, and an unacknowledged event is redelivered on the next receive
//! - Publishing never blocks reconciliation; the bus decouples listener
//!   cadence from reconciliation cadence
//!
//! ## Event Types
//!
//! Events are organized by source:
//! - Interruption notices (`interruption.*`) from the provider signal feed
//! - Workload observations (`workloads.*`) from the orchestrator
//! - Node lifecycle observations (`node.*`)

mod bus;
mod envelope;
mod error;
mod types;

pub use bus::{EventBus, Subscription};
pub use envelope::*;
pub use error::EventError;
pub use types::*;
