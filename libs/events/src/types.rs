//! Event type definitions for all fleet controller events.
//!
//! Each event kind has a corresponding payload with the event-specific data.
//! Interruption notices are the normalized form of the provider's raw signal
//! feed; they are consumed exactly once by the disruption controller.

use chrono::{DateTime, Utc};
use flotilla_id::{NodeId, NoticeId, WorkloadId};
use serde::{Deserialize, Serialize};

/// All event type names as constants.
pub mod event_types {
    // Interruption signals
    pub const INTERRUPTION_NOTICE: &str = "interruption.notice";

    // Workload observations
    pub const WORKLOADS_UNSCHEDULABLE: &str = "workloads.unschedulable";

    // Node lifecycle observations
    pub const NODE_REGISTERED: &str = "node.registered";
    pub const NODE_DEREGISTERED: &str = "node.deregistered";
}

/// Kind of interruption signal, normalized from the provider feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionKind {
    /// The provider warned that the instance will be reclaimed soon.
    VoluntaryWarning,

    /// The provider hinted that capacity should be rebalanced away.
    RebalanceHint,

    /// The instance was terminated out-of-band; observed after the fact.
    InvoluntaryTermination,

    /// The host is scheduled for maintenance; the instance is already lost
    /// from the controller's perspective.
    ScheduledMaintenance,
}

impl InterruptionKind {
    /// Returns true if the node is already gone (or as good as gone) and
    /// cooperative drain is pointless.
    pub fn is_involuntary(&self) -> bool {
        matches!(
            self,
            InterruptionKind::InvoluntaryTermination | InterruptionKind::ScheduledMaintenance
        )
    }
}

impl std::fmt::Display for InterruptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InterruptionKind::VoluntaryWarning => "voluntary_warning",
            InterruptionKind::RebalanceHint => "rebalance_hint",
            InterruptionKind::InvoluntaryTermination => "involuntary_termination",
            InterruptionKind::ScheduledMaintenance => "scheduled_maintenance",
        };
        write!(f, "{}", s)
    }
}

/// A normalized interruption event targeting a single fleet node.
///
/// Ephemeral: consumed once by the disruption controller and discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptionNotice {
    /// Unique notice identifier, used for idempotent redelivery handling.
    pub notice_id: NoticeId,

    /// The fleet node this notice targets.
    pub node_id: NodeId,

    /// What kind of interruption this is.
    pub kind: InterruptionKind,

    /// Deadline by which any cooperative action must complete.
    pub deadline: DateTime<Utc>,
}

/// Payload of a fleet event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// An interruption notice from the provider signal feed.
    InterruptionNotice(InterruptionNotice),

    /// The orchestrator reported unschedulable workloads; nudges the
    /// provisioning reconciler without waiting for its periodic tick.
    WorkloadsUnschedulable { workload_ids: Vec<WorkloadId> },

    /// A launched instance joined the cluster and became schedulable.
    NodeRegistered { node_id: NodeId },

    /// A node left the cluster (terminated and deregistered).
    NodeDeregistered { node_id: NodeId },
}

impl EventKind {
    /// Canonical event type name for logging and filtering.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::InterruptionNotice(_) => event_types::INTERRUPTION_NOTICE,
            EventKind::WorkloadsUnschedulable { .. } => event_types::WORKLOADS_UNSCHEDULABLE,
            EventKind::NodeRegistered { .. } => event_types::NODE_REGISTERED,
            EventKind::NodeDeregistered { .. } => event_types::NODE_DEREGISTERED,
        }
    }
}
