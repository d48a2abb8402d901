//! Event envelope - the common wrapper for all fleet events.

use chrono::{DateTime, Utc};
use flotilla_id::EventSeq;
use serde::{Deserialize, Serialize};

use crate::EventKind;

/// The event envelope - common metadata for all fleet events.
///
/// Sequence numbers are assigned by the bus at publish time and are globally
/// monotonic, so consumers can rely on envelope order matching publish order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetEvent {
    /// Globally monotonic sequence number.
    pub seq: EventSeq,

    /// When the event was published.
    pub occurred_at: DateTime<Utc>,

    /// Event-specific payload.
    pub kind: EventKind,
}

impl FleetEvent {
    /// Canonical event type name for logging and filtering.
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}
