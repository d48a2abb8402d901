//! The fleet registry: single source of truth for claims and nodes.
//!
//! All shared fleet state lives behind this one synchronized component. The
//! provisioning reconciler is the only writer of claim state; the disruption
//! controller reads claims and mutates node state, but terminates only
//! through the same command path, so the two loops never race on ownership.
//!
//! Claims and nodes reference each other by ID through the registry maps;
//! there are no direct pointers between them. A claim gains a node reference
//! only at registration.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use flotilla_id::{ClaimId, NodeId, PoolId, WorkloadId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::catalog::CapacityType;
use crate::provider::tags;
use crate::resources::ResourceVector;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("claim not found: {0}")]
    ClaimNotFound(ClaimId),

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("invalid claim transition for {claim_id}: {from} -> {to}")]
    InvalidTransition {
        claim_id: ClaimId,
        from: ClaimState,
        to: ClaimState,
    },

    #[error("node {0} does not carry controller ownership tags")]
    NotOwned(NodeId),
}

/// Lifecycle state of a node claim.
///
/// The only legal sequences are prefixes of
/// `Pending, Launching, Launched, Registering, Ready`, with `Failed`
/// reachable from any non-terminal state. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    Pending,
    Launching,
    Launched,
    Registering,
    Ready,
    Failed,
}

impl ClaimState {
    /// Returns true for terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClaimState::Ready | ClaimState::Failed)
    }

    /// Returns true if the transition `self -> to` is legal.
    pub fn can_transition(&self, to: ClaimState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if to == ClaimState::Failed {
            return true;
        }
        matches!(
            (self, to),
            (ClaimState::Pending, ClaimState::Launching)
                | (ClaimState::Launching, ClaimState::Launched)
                | (ClaimState::Launched, ClaimState::Registering)
                | (ClaimState::Registering, ClaimState::Ready)
        )
    }
}

impl std::fmt::Display for ClaimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClaimState::Pending => "pending",
            ClaimState::Launching => "launching",
            ClaimState::Launched => "launched",
            ClaimState::Registering => "registering",
            ClaimState::Ready => "ready",
            ClaimState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Why a claim entered a given state, for the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimReason {
    LaunchFailed,
    RegistrationTimeout,
    ProviderRejected,
    RetriesExhausted,
    Released,
}

/// The controller's record of an in-flight or active provisioning request.
///
/// Owned exclusively by the provisioning reconciler; the source of truth
/// until a fleet node is confirmed registered.
#[derive(Debug, Clone, Serialize)]
pub struct NodeClaim {
    pub claim_id: ClaimId,
    pub pool_id: PoolId,

    /// The SKU actually launched (head of `sku_candidates`).
    pub sku_id: String,

    /// Requested SKU candidates, ordered by preference.
    pub sku_candidates: Vec<String>,

    pub capacity_type: CapacityType,
    pub zone: String,

    /// Allocatable capacity of the chosen SKU, counted against pool limits
    /// while the claim is in flight.
    pub capacity: ResourceVector,

    /// Workloads this claim was created for.
    pub workload_ids: Vec<WorkloadId>,

    /// Sum of demands of `workload_ids`, carried onto the node at
    /// registration as its initial occupancy.
    pub requested: ResourceVector,

    /// Offering price at decision time, carried onto the node at
    /// registration for later cost comparisons.
    pub price_per_hour: f64,

    pub state: ClaimState,

    /// Every state observed, in order; the state machine makes this a
    /// subsequence of the legal sequence by construction.
    pub state_history: Vec<ClaimState>,

    pub created_at: DateTime<Utc>,

    /// Deadline for the launched instance to register, set at launch
    /// confirmation and cleared on Ready.
    pub registration_deadline: Option<DateTime<Utc>>,

    pub instance_id: Option<String>,

    /// Populated only at registration.
    pub node_id: Option<NodeId>,

    pub reason: Option<ClaimReason>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl NodeClaim {
    pub fn new(
        pool_id: PoolId,
        sku_candidates: Vec<String>,
        capacity_type: CapacityType,
        zone: String,
        capacity: ResourceVector,
        requested: ResourceVector,
        workload_ids: Vec<WorkloadId>,
        price_per_hour: f64,
    ) -> Self {
        let sku_id = sku_candidates.first().cloned().unwrap_or_default();
        Self {
            claim_id: ClaimId::new(),
            pool_id,
            sku_id,
            sku_candidates,
            capacity_type,
            zone,
            capacity,
            requested,
            workload_ids,
            price_per_hour,
            state: ClaimState::Pending,
            state_history: vec![ClaimState::Pending],
            created_at: Utc::now(),
            registration_deadline: None,
            instance_id: None,
            node_id: None,
            reason: None,
            failed_at: None,
        }
    }
}

/// Lifecycle state of a registered fleet node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Ready,
    Cordoned,
    Draining,
    Terminated,
}

/// A running compute instance bound to the cluster.
#[derive(Debug, Clone, Serialize)]
pub struct FleetNode {
    pub node_id: NodeId,
    pub claim_id: ClaimId,
    pub pool_id: PoolId,
    pub instance_id: String,
    pub sku_id: String,
    pub capacity_type: CapacityType,
    pub zone: String,
    pub launched_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub state: NodeState,

    /// Allocatable resources reported at registration.
    pub allocatable: ResourceVector,

    /// Sum of demands of the workloads currently on the node.
    pub requested: ResourceVector,

    /// Workloads currently placed on the node, per the orchestrator.
    pub workloads: Vec<WorkloadId>,

    /// Ownership tags stamped on the instance at launch.
    pub tags: std::collections::BTreeMap<String, String>,

    /// Price at launch, used by the consolidation pass for cost comparison.
    pub price_per_hour: f64,
}

impl FleetNode {
    /// Returns true if the node carries both controller ownership tags.
    /// Nodes without them are externally-managed and must never be
    /// terminated by this controller.
    pub fn is_owned(&self) -> bool {
        self.tags.contains_key(tags::CLUSTER) && self.tags.contains_key(tags::POOL)
    }

    /// Utilization of the busiest resource dimension.
    pub fn utilization(&self) -> f64 {
        self.requested.utilization_against(&self.allocatable)
    }

    /// Returns true if no workloads are assigned.
    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    claims: HashMap<ClaimId, NodeClaim>,
    nodes: HashMap<NodeId, FleetNode>,
}

/// The synchronized claim registry and node inventory.
#[derive(Default)]
pub struct FleetRegistry {
    inner: RwLock<Inner>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------
    // Claims
    // -------------------------------------------------------------------

    pub async fn insert_claim(&self, claim: NodeClaim) -> ClaimId {
        let claim_id = claim.claim_id;
        debug!(claim_id = %claim_id, pool_id = %claim.pool_id, "Inserting claim");
        self.inner.write().await.claims.insert(claim_id, claim);
        claim_id
    }

    pub async fn get_claim(&self, claim_id: ClaimId) -> Option<NodeClaim> {
        self.inner.read().await.claims.get(&claim_id).cloned()
    }

    pub async fn list_claims(&self) -> Vec<NodeClaim> {
        let mut claims: Vec<_> = self.inner.read().await.claims.values().cloned().collect();
        claims.sort_by_key(|c| c.claim_id);
        claims
    }

    /// Transition a claim, enforcing the state machine. Terminal states are
    /// sticky: any transition out of them is rejected.
    pub async fn transition_claim(
        &self,
        claim_id: ClaimId,
        to: ClaimState,
        reason: Option<ClaimReason>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let claim = inner
            .claims
            .get_mut(&claim_id)
            .ok_or(RegistryError::ClaimNotFound(claim_id))?;

        if !claim.state.can_transition(to) {
            return Err(RegistryError::InvalidTransition {
                claim_id,
                from: claim.state,
                to,
            });
        }

        debug!(claim_id = %claim_id, from = %claim.state, to = %to, "Claim transition");
        claim.state = to;
        claim.state_history.push(to);
        if let Some(reason) = reason {
            claim.reason = Some(reason);
        }
        match to {
            ClaimState::Ready => claim.registration_deadline = None,
            ClaimState::Failed => claim.failed_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    /// Record launch confirmation details on a claim.
    pub async fn set_claim_launched(
        &self,
        claim_id: ClaimId,
        instance_id: String,
        registration_deadline: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let claim = inner
            .claims
            .get_mut(&claim_id)
            .ok_or(RegistryError::ClaimNotFound(claim_id))?;
        claim.instance_id = Some(instance_id);
        claim.registration_deadline = Some(registration_deadline);
        Ok(())
    }

    /// Find the claim tracking a given provider instance.
    pub async fn claim_by_instance(&self, instance_id: &str) -> Option<NodeClaim> {
        self.inner
            .read()
            .await
            .claims
            .values()
            .find(|c| c.instance_id.as_deref() == Some(instance_id))
            .cloned()
    }

    /// Bind a registered node to its claim and mark the claim Ready.
    ///
    /// The claim must be in `Registering`. Node insert and claim transition
    /// happen under one write lock so no reader observes a Ready claim
    /// without its node.
    pub async fn bind_registration(
        &self,
        claim_id: ClaimId,
        node: FleetNode,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let claim = inner
            .claims
            .get_mut(&claim_id)
            .ok_or(RegistryError::ClaimNotFound(claim_id))?;

        if !claim.state.can_transition(ClaimState::Ready) {
            return Err(RegistryError::InvalidTransition {
                claim_id,
                from: claim.state,
                to: ClaimState::Ready,
            });
        }

        info!(
            claim_id = %claim_id,
            node_id = %node.node_id,
            sku_id = %node.sku_id,
            "Claim bound to registered node"
        );
        claim.state = ClaimState::Ready;
        claim.state_history.push(ClaimState::Ready);
        claim.registration_deadline = None;
        claim.node_id = Some(node.node_id);
        inner.nodes.insert(node.node_id, node);
        Ok(())
    }

    /// Workloads referenced by any non-terminal claim. Used to avoid
    /// launching twice for the same unplaced workload set.
    pub async fn workloads_in_flight(&self) -> HashSet<WorkloadId> {
        self.inner
            .read()
            .await
            .claims
            .values()
            .filter(|c| !c.state.is_terminal())
            .flat_map(|c| c.workload_ids.iter().copied())
            .collect()
    }

    /// Claims past their registration deadline.
    pub async fn expired_claims(&self, now: DateTime<Utc>) -> Vec<NodeClaim> {
        self.inner
            .read()
            .await
            .claims
            .values()
            .filter(|c| {
                !c.state.is_terminal()
                    && c.registration_deadline.is_some_and(|deadline| now > deadline)
            })
            .cloned()
            .collect()
    }

    /// Remove Failed claims older than the grace period. Returns the removed
    /// claim IDs. A claim never silently disappears: it is either bound and
    /// Ready, or Failed and collected here.
    pub async fn gc_failed_claims(&self, grace: Duration) -> Vec<ClaimId> {
        let cutoff = Utc::now() - chrono::Duration::from_std(grace).unwrap_or_default();
        let mut inner = self.inner.write().await;
        let expired: Vec<ClaimId> = inner
            .claims
            .values()
            .filter(|c| {
                c.state == ClaimState::Failed && c.failed_at.is_some_and(|at| at < cutoff)
            })
            .map(|c| c.claim_id)
            .collect();
        for claim_id in &expired {
            inner.claims.remove(claim_id);
            debug!(claim_id = %claim_id, "Garbage-collected failed claim");
        }
        expired
    }

    // -------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------

    pub async fn get_node(&self, node_id: NodeId) -> Option<FleetNode> {
        self.inner.read().await.nodes.get(&node_id).cloned()
    }

    pub async fn list_nodes(&self) -> Vec<FleetNode> {
        let mut nodes: Vec<_> = self.inner.read().await.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.node_id);
        nodes
    }

    pub async fn node_by_instance(&self, instance_id: &str) -> Option<FleetNode> {
        self.inner
            .read()
            .await
            .nodes
            .values()
            .find(|n| n.instance_id == instance_id)
            .cloned()
    }

    /// Update a node's occupancy from the orchestrator's view.
    pub async fn set_node_workloads(
        &self,
        node_id: NodeId,
        workloads: Vec<WorkloadId>,
        requested: ResourceVector,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let node = inner
            .nodes
            .get_mut(&node_id)
            .ok_or(RegistryError::NodeNotFound(node_id))?;
        node.workloads = workloads;
        node.requested = requested;
        Ok(())
    }

    pub async fn set_node_state(
        &self,
        node_id: NodeId,
        state: NodeState,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let node = inner
            .nodes
            .get_mut(&node_id)
            .ok_or(RegistryError::NodeNotFound(node_id))?;
        debug!(node_id = %node_id, from = ?node.state, to = ?state, "Node state change");
        node.state = state;
        Ok(())
    }

    /// Check the ownership guard for termination. Only nodes carrying both
    /// the cluster tag and the pool tag may be terminated by this controller.
    pub async fn ensure_terminable(&self, node_id: NodeId) -> Result<FleetNode, RegistryError> {
        let inner = self.inner.read().await;
        let node = inner
            .nodes
            .get(&node_id)
            .ok_or(RegistryError::NodeNotFound(node_id))?;
        if !node.is_owned() {
            return Err(RegistryError::NotOwned(node_id));
        }
        Ok(node.clone())
    }

    /// Remove a node from the inventory (after termination/deregistration).
    pub async fn remove_node(&self, node_id: NodeId) -> Option<FleetNode> {
        self.inner.write().await.nodes.remove(&node_id)
    }

    // -------------------------------------------------------------------
    // Aggregates
    // -------------------------------------------------------------------

    /// Aggregate allocatable capacity committed to a pool: live nodes plus
    /// in-flight claims. Launch decisions are checked against this total so
    /// pool limits are never exceeded even with claims still registering.
    pub async fn pool_committed(&self, pool_id: PoolId) -> ResourceVector {
        let inner = self.inner.read().await;
        let mut total = ResourceVector::default();
        for node in inner.nodes.values() {
            if node.pool_id == pool_id && node.state != NodeState::Terminated {
                total.add(&node.allocatable);
            }
        }
        for claim in inner.claims.values() {
            if claim.pool_id == pool_id && !claim.state.is_terminal() {
                total.add(&claim.capacity);
            }
        }
        total
    }

    /// Nodes in a pool, for the disruption scan.
    pub async fn pool_nodes(&self, pool_id: PoolId) -> Vec<FleetNode> {
        let mut nodes: Vec<_> = self
            .inner
            .read()
            .await
            .nodes
            .values()
            .filter(|n| n.pool_id == pool_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.node_id);
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn claim() -> NodeClaim {
        NodeClaim::new(
            PoolId::new(),
            vec!["m5.large".to_string()],
            CapacityType::Spot,
            "zone-a".to_string(),
            ResourceVector::cpu_mem(2000, 8 << 30),
            ResourceVector::cpu_mem(500, 1 << 30),
            vec![WorkloadId::new()],
            0.05,
        )
    }

    fn owned_tags() -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(tags::CLUSTER.to_string(), "test".to_string());
        map.insert(tags::POOL.to_string(), "pool_x".to_string());
        map
    }

    fn node_for(claim: &NodeClaim, tags: BTreeMap<String, String>) -> FleetNode {
        FleetNode {
            node_id: NodeId::new(),
            claim_id: claim.claim_id,
            pool_id: claim.pool_id,
            instance_id: "i-123".to_string(),
            sku_id: claim.sku_id.clone(),
            capacity_type: claim.capacity_type,
            zone: claim.zone.clone(),
            launched_at: Utc::now(),
            registered_at: Utc::now(),
            state: NodeState::Ready,
            allocatable: claim.capacity.clone(),
            requested: ResourceVector::default(),
            workloads: Vec::new(),
            tags,
            price_per_hour: 0.05,
        }
    }

    use rstest::rstest;

    #[rstest]
    #[case::pending_launching(ClaimState::Pending, ClaimState::Launching, true)]
    #[case::launching_launched(ClaimState::Launching, ClaimState::Launched, true)]
    #[case::launched_registering(ClaimState::Launched, ClaimState::Registering, true)]
    #[case::registering_ready(ClaimState::Registering, ClaimState::Ready, true)]
    #[case::pending_failed(ClaimState::Pending, ClaimState::Failed, true)]
    #[case::registering_failed(ClaimState::Registering, ClaimState::Failed, true)]
    #[case::no_skip_to_launched(ClaimState::Pending, ClaimState::Launched, false)]
    #[case::no_skip_to_ready(ClaimState::Pending, ClaimState::Ready, false)]
    #[case::ready_is_terminal(ClaimState::Ready, ClaimState::Failed, false)]
    #[case::failed_is_terminal(ClaimState::Failed, ClaimState::Pending, false)]
    #[case::no_resurrection(ClaimState::Failed, ClaimState::Ready, false)]
    fn test_state_machine_transitions(
        #[case] from: ClaimState,
        #[case] to: ClaimState,
        #[case] legal: bool,
    ) {
        assert_eq!(from.can_transition(to), legal);
    }

    #[tokio::test]
    async fn test_transition_enforced_by_registry() {
        let registry = FleetRegistry::new();
        let claim_id = registry.insert_claim(claim()).await;

        registry
            .transition_claim(claim_id, ClaimState::Launching, None)
            .await
            .unwrap();

        let err = registry
            .transition_claim(claim_id, ClaimState::Ready, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_history_is_legal_subsequence() {
        let registry = FleetRegistry::new();
        let claim_id = registry.insert_claim(claim()).await;
        registry
            .transition_claim(claim_id, ClaimState::Launching, None)
            .await
            .unwrap();
        registry
            .transition_claim(claim_id, ClaimState::Failed, Some(ClaimReason::LaunchFailed))
            .await
            .unwrap();

        let stored = registry.get_claim(claim_id).await.unwrap();
        assert_eq!(
            stored.state_history,
            vec![ClaimState::Pending, ClaimState::Launching, ClaimState::Failed]
        );
        assert_eq!(stored.reason, Some(ClaimReason::LaunchFailed));
        assert!(stored.failed_at.is_some());
    }

    #[tokio::test]
    async fn test_bind_registration_requires_registering() {
        let registry = FleetRegistry::new();
        let c = claim();
        let node = node_for(&c, owned_tags());
        let claim_id = registry.insert_claim(c).await;

        let err = registry
            .bind_registration(claim_id, node.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));

        for state in [ClaimState::Launching, ClaimState::Launched, ClaimState::Registering] {
            registry.transition_claim(claim_id, state, None).await.unwrap();
        }
        registry.bind_registration(claim_id, node.clone()).await.unwrap();

        let stored = registry.get_claim(claim_id).await.unwrap();
        assert_eq!(stored.state, ClaimState::Ready);
        assert_eq!(stored.node_id, Some(node.node_id));
        assert!(stored.registration_deadline.is_none());
        assert!(registry.get_node(node.node_id).await.is_some());
    }

    #[tokio::test]
    async fn test_ownership_guard() {
        let registry = FleetRegistry::new();
        let c = claim();
        let claim_id = registry.insert_claim(c.clone()).await;
        for state in [ClaimState::Launching, ClaimState::Launched, ClaimState::Registering] {
            registry.transition_claim(claim_id, state, None).await.unwrap();
        }

        let mut foreign = node_for(&c, BTreeMap::new());
        foreign.claim_id = claim_id;
        let node_id = foreign.node_id;
        registry.bind_registration(claim_id, foreign).await.unwrap();

        let err = registry.ensure_terminable(node_id).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotOwned(_)));
    }

    #[tokio::test]
    async fn test_set_node_workloads_updates_occupancy() {
        let registry = FleetRegistry::new();
        let c = claim();
        let claim_id = registry.insert_claim(c.clone()).await;
        for state in [ClaimState::Launching, ClaimState::Launched, ClaimState::Registering] {
            registry.transition_claim(claim_id, state, None).await.unwrap();
        }
        let node = node_for(&c, owned_tags());
        let node_id = node.node_id;
        registry.bind_registration(claim_id, node).await.unwrap();

        let placed = vec![WorkloadId::new(), WorkloadId::new()];
        registry
            .set_node_workloads(node_id, placed.clone(), ResourceVector::cpu_mem(1500, 3 << 30))
            .await
            .unwrap();

        let node = registry.get_node(node_id).await.unwrap();
        assert_eq!(node.workloads, placed);
        assert_eq!(node.requested.cpu_millis, 1500);
        assert!(!node.is_empty());

        let missing = registry
            .set_node_workloads(NodeId::new(), Vec::new(), ResourceVector::default())
            .await
            .unwrap_err();
        assert!(matches!(missing, RegistryError::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn test_pool_committed_counts_claims_and_nodes() {
        let registry = FleetRegistry::new();
        let c = claim();
        let pool_id = c.pool_id;
        registry.insert_claim(c).await;

        let committed = registry.pool_committed(pool_id).await;
        assert_eq!(committed.cpu_millis, 2000);

        // A failed claim stops counting.
        let claims = registry.list_claims().await;
        registry
            .transition_claim(claims[0].claim_id, ClaimState::Failed, None)
            .await
            .unwrap();
        assert!(registry.pool_committed(pool_id).await.is_zero());
    }

    #[tokio::test]
    async fn test_gc_failed_claims() {
        let registry = FleetRegistry::new();
        let claim_id = registry.insert_claim(claim()).await;
        registry
            .transition_claim(claim_id, ClaimState::Failed, Some(ClaimReason::Released))
            .await
            .unwrap();

        // Not yet past grace.
        assert!(registry
            .gc_failed_claims(Duration::from_secs(3600))
            .await
            .is_empty());

        // Zero grace collects immediately.
        let removed = registry.gc_failed_claims(Duration::ZERO).await;
        assert_eq!(removed, vec![claim_id]);
        assert!(registry.get_claim(claim_id).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_claims() {
        let registry = FleetRegistry::new();
        let claim_id = registry.insert_claim(claim()).await;
        registry
            .transition_claim(claim_id, ClaimState::Launching, None)
            .await
            .unwrap();
        registry
            .set_claim_launched(
                claim_id,
                "i-1".to_string(),
                Utc::now() - chrono::Duration::seconds(1),
            )
            .await
            .unwrap();

        let expired = registry.expired_claims(Utc::now()).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].claim_id, claim_id);
    }
}
