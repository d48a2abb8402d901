//! Orchestrator interface and mock implementation.
//!
//! The orchestrator interface abstracts the external workload orchestrator:
//! - The feed of currently-unschedulable workload units
//! - Cordon (mark unschedulable) and evict commands
//! - Registration signals for newly joined nodes
//! - Node deregistration
//!
//! The controller never schedules workloads itself; it only provisions
//! capacity and relies on the orchestrator to place workloads onto it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use flotilla_id::{NodeId, WorkloadId};
use thiserror::Error;
use tracing::{debug, info};

use crate::resources::ResourceVector;
use crate::workload::WorkloadUnit;

/// Errors from orchestrator commands.
#[derive(Debug, Error, Clone)]
pub enum OrchestratorError {
    /// The orchestrator API is unreachable; retried on the next cycle.
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),

    /// The referenced node or workload is unknown.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Outcome of an eviction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionOutcome {
    /// The workload was evicted.
    Evicted,

    /// The workload's own disruption budget blocked the eviction; retry
    /// later or escalate.
    Blocked,
}

/// Signal that a launched instance joined the cluster as a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRegistration {
    /// The provider instance handle this node corresponds to.
    pub instance_id: String,

    /// Node identity assigned at join.
    pub node_id: NodeId,

    /// Allocatable resources reported by the node.
    pub allocatable: ResourceVector,

    /// True once the node is accepting workloads. A node that has joined but
    /// is not yet schedulable keeps its claim in the registering state.
    pub schedulable: bool,
}

/// Orchestrator interface.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Snapshot of workload units the orchestrator currently cannot place.
    async fn unschedulable_workloads(&self) -> Result<Vec<WorkloadUnit>, OrchestratorError>;

    /// Drain pending registration signals, in arrival order.
    async fn poll_registrations(&self) -> Result<Vec<NodeRegistration>, OrchestratorError>;

    /// Snapshot of current placements, keyed by node. Nodes absent from the
    /// map have no placement data this poll and keep their last known
    /// occupancy.
    async fn placements(&self) -> Result<HashMap<NodeId, Vec<WorkloadUnit>>, OrchestratorError>;

    /// Mark a node unschedulable so no new workloads land on it.
    async fn cordon(&self, node_id: NodeId) -> Result<(), OrchestratorError>;

    /// Undo a cordon after an abandoned drain.
    async fn uncordon(&self, node_id: NodeId) -> Result<(), OrchestratorError>;

    /// Request eviction of a workload, respecting its disruption budget.
    async fn evict(&self, workload_id: WorkloadId) -> Result<EvictionOutcome, OrchestratorError>;

    /// Remove a node object after its instance is gone.
    async fn deregister(&self, node_id: NodeId) -> Result<(), OrchestratorError>;
}

// =============================================================================
// Mock orchestrator
// =============================================================================

#[derive(Default)]
struct MockState {
    unschedulable: Vec<WorkloadUnit>,
    pending_registrations: VecDeque<NodeRegistration>,
    cordoned: HashSet<NodeId>,
    placements: HashMap<NodeId, Vec<WorkloadUnit>>,
    deregistered: Vec<NodeId>,
    evictions: Vec<WorkloadId>,
    blocked: HashMap<WorkloadId, u32>,
}

/// Mock orchestrator for testing and development.
#[derive(Default)]
pub struct MockOrchestrator {
    state: Mutex<MockState>,
}

impl MockOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the unschedulable workload snapshot.
    pub fn set_unschedulable(&self, workloads: Vec<WorkloadUnit>) {
        self.state.lock().unwrap().unschedulable = workloads;
    }

    /// Remove workloads from the unschedulable snapshot (they got placed).
    pub fn mark_scheduled(&self, workload_ids: &[WorkloadId]) {
        let mut state = self.state.lock().unwrap();
        state
            .unschedulable
            .retain(|w| !workload_ids.contains(&w.workload_id));
    }

    /// Queue a registration signal for the next poll.
    pub fn push_registration(&self, registration: NodeRegistration) {
        self.state
            .lock()
            .unwrap()
            .pending_registrations
            .push_back(registration);
    }

    /// Record workloads as placed on a node, visible through
    /// [`Orchestrator::placements`]. Evicting a workload removes it again.
    pub fn place_workloads(&self, node_id: NodeId, workloads: Vec<WorkloadUnit>) {
        self.state
            .lock()
            .unwrap()
            .placements
            .entry(node_id)
            .or_default()
            .extend(workloads);
    }

    /// Make the next `times` eviction attempts for a workload return
    /// [`EvictionOutcome::Blocked`].
    pub fn block_evictions(&self, workload_id: WorkloadId, times: u32) {
        self.state.lock().unwrap().blocked.insert(workload_id, times);
    }

    pub fn cordoned(&self) -> Vec<NodeId> {
        self.state.lock().unwrap().cordoned.iter().copied().collect()
    }

    pub fn deregistered(&self) -> Vec<NodeId> {
        self.state.lock().unwrap().deregistered.clone()
    }

    pub fn eviction_journal(&self) -> Vec<WorkloadId> {
        self.state.lock().unwrap().evictions.clone()
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn unschedulable_workloads(&self) -> Result<Vec<WorkloadUnit>, OrchestratorError> {
        Ok(self.state.lock().unwrap().unschedulable.clone())
    }

    async fn poll_registrations(&self) -> Result<Vec<NodeRegistration>, OrchestratorError> {
        let mut state = self.state.lock().unwrap();
        Ok(state.pending_registrations.drain(..).collect())
    }

    async fn placements(&self) -> Result<HashMap<NodeId, Vec<WorkloadUnit>>, OrchestratorError> {
        Ok(self.state.lock().unwrap().placements.clone())
    }

    async fn cordon(&self, node_id: NodeId) -> Result<(), OrchestratorError> {
        info!(node_id = %node_id, "[MOCK] Cordoning node");
        self.state.lock().unwrap().cordoned.insert(node_id);
        Ok(())
    }

    async fn uncordon(&self, node_id: NodeId) -> Result<(), OrchestratorError> {
        info!(node_id = %node_id, "[MOCK] Uncordoning node");
        self.state.lock().unwrap().cordoned.remove(&node_id);
        Ok(())
    }

    async fn evict(&self, workload_id: WorkloadId) -> Result<EvictionOutcome, OrchestratorError> {
        let mut state = self.state.lock().unwrap();
        state.evictions.push(workload_id);

        if let Some(remaining) = state.blocked.get_mut(&workload_id) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!(workload_id = %workload_id, "[MOCK] Eviction blocked by workload budget");
                return Ok(EvictionOutcome::Blocked);
            }
        }
        for placed in state.placements.values_mut() {
            placed.retain(|w| w.workload_id != workload_id);
        }
        Ok(EvictionOutcome::Evicted)
    }

    async fn deregister(&self, node_id: NodeId) -> Result<(), OrchestratorError> {
        info!(node_id = %node_id, "[MOCK] Deregistering node");
        let mut state = self.state.lock().unwrap();
        state.placements.remove(&node_id);
        state.deregistered.push(node_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registrations_drained_in_order() {
        let orchestrator = MockOrchestrator::new();
        let a = NodeId::new();
        let b = NodeId::new();
        orchestrator.push_registration(NodeRegistration {
            instance_id: "i-1".to_string(),
            node_id: a,
            allocatable: ResourceVector::cpu_mem(2000, 4 << 30),
            schedulable: true,
        });
        orchestrator.push_registration(NodeRegistration {
            instance_id: "i-2".to_string(),
            node_id: b,
            allocatable: ResourceVector::cpu_mem(2000, 4 << 30),
            schedulable: true,
        });

        let drained = orchestrator.poll_registrations().await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].node_id, a);
        assert_eq!(drained[1].node_id, b);
        assert!(orchestrator.poll_registrations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blocked_evictions_unblock_after_budget() {
        let orchestrator = MockOrchestrator::new();
        let workload_id = WorkloadId::new();
        orchestrator.block_evictions(workload_id, 2);

        assert_eq!(
            orchestrator.evict(workload_id).await.unwrap(),
            EvictionOutcome::Blocked
        );
        assert_eq!(
            orchestrator.evict(workload_id).await.unwrap(),
            EvictionOutcome::Blocked
        );
        assert_eq!(
            orchestrator.evict(workload_id).await.unwrap(),
            EvictionOutcome::Evicted
        );
        assert_eq!(orchestrator.eviction_journal().len(), 3);
    }
}
