//! Core provisioning logic, one reconcile cycle at a time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flotilla_events::{EventBus, EventError, EventKind};
use flotilla_id::{ClaimId, WorkloadId};
use flotilla_reconcile::{Backoff, ConvergenceStatus, DEFAULT_RETRY_WINDOW};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::{CapacityType, CatalogHandle};
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::pool::{NodePool, PoolSet};
use crate::provider::{tags, CloudProvider, LaunchRequest, ProviderError};
use crate::registry::{
    ClaimReason, ClaimState, FleetNode, FleetRegistry, NodeClaim, NodeState, RegistryError,
};
use crate::resources::ResourceVector;
use crate::scheduler::{simulate, InfeasibleReason, PlanEntry, SimulatorInput};
use crate::workload::{PlacementConstraints, WorkloadUnit};

/// Errors from provisioning operations.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Bus(#[from] EventError),

    #[error("pool not found: {0}")]
    UnknownPool(flotilla_id::PoolId),

    #[error("no feasible replacement: {0}")]
    ReplacementInfeasible(#[from] crate::scheduler::Infeasible),

    #[error("cheapest replacement at {candidate}/h is not below {current}/h")]
    ReplacementNotCheaper { candidate: f64, current: f64 },
}

/// Timing knobs for the launch retry schedule and claim collection.
#[derive(Debug, Clone)]
pub struct ProvisionTuning {
    pub launch_retry_base: Duration,
    pub launch_retry_max: Duration,
    pub launch_retry_window: Duration,

    /// How long failed claims stay visible before garbage collection.
    pub failed_claim_grace: Duration,
}

impl Default for ProvisionTuning {
    fn default() -> Self {
        Self {
            launch_retry_base: Duration::from_millis(500),
            launch_retry_max: Duration::from_secs(30),
            launch_retry_window: DEFAULT_RETRY_WINDOW,
            failed_claim_grace: Duration::from_secs(10 * 60),
        }
    }
}

/// The launch decision committed in a cycle, if any.
#[derive(Debug, Clone)]
pub struct LaunchSummary {
    pub pool: String,
    pub sku_id: String,
    pub capacity_type: CapacityType,
    pub replicas: u32,
}

/// What one reconcile cycle did, for logging and tests.
#[derive(Debug, Default)]
pub struct CycleSummary {
    /// Registrations bound to claims.
    pub bound: usize,

    /// Claims failed for missing their registration deadline.
    pub expired: usize,

    /// Failed claims garbage-collected.
    pub collected: usize,

    /// The single launch decision of this cycle, if one was committed.
    pub launched: Option<LaunchSummary>,

    /// Pools with unplaced demand but no feasible packing.
    pub infeasible: Vec<(String, InfeasibleReason)>,
}

impl CycleSummary {
    /// Convergence verdict for the cycle: diverged when demand exists that
    /// cannot be met, converging while claims are still moving, converged
    /// when the cycle observed nothing to do.
    pub fn convergence(&self) -> ConvergenceStatus {
        if !self.infeasible.is_empty() {
            ConvergenceStatus::Diverged
        } else if self.launched.is_some() || self.bound > 0 || self.expired > 0 {
            ConvergenceStatus::Converging
        } else {
            ConvergenceStatus::Converged
        }
    }
}

/// The provisioning reconciler.
///
/// Sole writer of claim state. The disruption controller requests capacity
/// through [`ProvisioningReconciler::provision_replacement`] rather than
/// touching claims itself.
pub struct ProvisioningReconciler {
    pools: Arc<PoolSet>,
    catalog: CatalogHandle,
    registry: Arc<FleetRegistry>,
    provider: Arc<dyn CloudProvider>,
    orchestrator: Arc<dyn Orchestrator>,
    bus: EventBus,
    cluster: String,
    tuning: ProvisionTuning,
}

impl ProvisioningReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pools: Arc<PoolSet>,
        catalog: CatalogHandle,
        registry: Arc<FleetRegistry>,
        provider: Arc<dyn CloudProvider>,
        orchestrator: Arc<dyn Orchestrator>,
        bus: EventBus,
        cluster: String,
        tuning: ProvisionTuning,
    ) -> Self {
        Self {
            pools,
            catalog,
            registry,
            provider,
            orchestrator,
            bus,
            cluster,
            tuning,
        }
    }

    /// Run one full reconcile cycle.
    ///
    /// Errors inside a cycle are logged and absorbed; the loop is
    /// self-healing and the next cycle retries from observed state.
    pub async fn reconcile_once(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();

        if let Err(e) = self.absorb_registrations(&mut summary).await {
            warn!(error = %e, "Failed to absorb registrations");
        }
        if let Err(e) = self.sync_occupancy().await {
            warn!(error = %e, "Failed to sync node occupancy");
        }
        self.expire_overdue_claims(&mut summary).await;
        summary.collected = self
            .registry
            .gc_failed_claims(self.tuning.failed_claim_grace)
            .await
            .len();

        if let Err(e) = self.provision_step(&mut summary).await {
            warn!(error = %e, "Provisioning step failed");
        }

        debug!(
            bound = summary.bound,
            expired = summary.expired,
            collected = summary.collected,
            launched = summary.launched.is_some(),
            convergence = ?summary.convergence(),
            "Reconcile cycle complete"
        );
        summary
    }

    // -------------------------------------------------------------------
    // Registrations
    // -------------------------------------------------------------------

    async fn absorb_registrations(&self, summary: &mut CycleSummary) -> Result<(), ProvisionError> {
        for registration in self.orchestrator.poll_registrations().await? {
            let Some(claim) = self.registry.claim_by_instance(&registration.instance_id).await
            else {
                warn!(
                    instance_id = %registration.instance_id,
                    "Registration for unknown instance, ignoring"
                );
                continue;
            };

            if claim.state.is_terminal() {
                debug!(claim_id = %claim.claim_id, state = %claim.state, "Claim already terminal");
                continue;
            }

            if claim.state == ClaimState::Launched {
                self.registry
                    .transition_claim(claim.claim_id, ClaimState::Registering, None)
                    .await?;
            }

            if !registration.schedulable {
                debug!(
                    claim_id = %claim.claim_id,
                    node_id = %registration.node_id,
                    "Node joined but is not schedulable yet"
                );
                continue;
            }

            let node_id = registration.node_id;
            let node = FleetNode {
                node_id,
                claim_id: claim.claim_id,
                pool_id: claim.pool_id,
                instance_id: registration.instance_id.clone(),
                sku_id: claim.sku_id.clone(),
                capacity_type: claim.capacity_type,
                zone: claim.zone.clone(),
                launched_at: claim.created_at,
                registered_at: Utc::now(),
                state: NodeState::Ready,
                allocatable: registration.allocatable,
                requested: claim.requested.clone(),
                workloads: claim.workload_ids.clone(),
                tags: self.ownership_tags(&claim),
                price_per_hour: claim.price_per_hour,
            };
            self.registry.bind_registration(claim.claim_id, node).await?;
            self.bus.publish(EventKind::NodeRegistered { node_id }).await?;
            summary.bound += 1;
        }
        Ok(())
    }

    /// Refresh node occupancy from the orchestrator's placement view. A node
    /// starts with the occupancy its claim was created for; this keeps it
    /// current as workloads come and go. Nodes the snapshot does not cover
    /// keep their last known occupancy.
    async fn sync_occupancy(&self) -> Result<(), ProvisionError> {
        for (node_id, placed) in self.orchestrator.placements().await? {
            let requested = ResourceVector::sum(placed.iter().map(|w| &w.demands));
            let workload_ids = placed.iter().map(|w| w.workload_id).collect();
            match self
                .registry
                .set_node_workloads(node_id, workload_ids, requested)
                .await
            {
                Ok(()) => {}
                Err(RegistryError::NodeNotFound(_)) => {
                    debug!(node_id = %node_id, "Placement report for a node we do not track");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Fail claims past their registration deadline and reclaim their
    /// instances. Terminate runs first so a transient provider failure
    /// leaves the claim non-terminal and retried next cycle.
    async fn expire_overdue_claims(&self, summary: &mut CycleSummary) {
        for claim in self.registry.expired_claims(Utc::now()).await {
            if let Some(instance_id) = &claim.instance_id {
                if let Err(e) = self.provider.terminate(instance_id).await {
                    warn!(
                        claim_id = %claim.claim_id,
                        instance_id = %instance_id,
                        error = %e,
                        "Terminate for overdue claim failed, retrying next cycle"
                    );
                    continue;
                }
            }

            warn!(
                claim_id = %claim.claim_id,
                sku_id = %claim.sku_id,
                "Claim missed its registration deadline"
            );
            if let Err(e) = self
                .registry
                .transition_claim(
                    claim.claim_id,
                    ClaimState::Failed,
                    Some(ClaimReason::RegistrationTimeout),
                )
                .await
            {
                warn!(claim_id = %claim.claim_id, error = %e, "Failed to expire claim");
                continue;
            }
            summary.expired += 1;
        }
    }

    // -------------------------------------------------------------------
    // Launch decisions
    // -------------------------------------------------------------------

    async fn provision_step(&self, summary: &mut CycleSummary) -> Result<(), ProvisionError> {
        let unplaced = self.orchestrator.unschedulable_workloads().await?;
        if unplaced.is_empty() {
            return Ok(());
        }

        // Workloads already covered by a non-terminal claim are not
        // provisioned for again.
        let in_flight = self.registry.workloads_in_flight().await;
        let pending: Vec<WorkloadUnit> = unplaced
            .into_iter()
            .filter(|w| !in_flight.contains(&w.workload_id))
            .collect();
        if pending.is_empty() {
            debug!("All unplaced workloads covered by in-flight claims");
            return Ok(());
        }

        let catalog = self.catalog.load();
        if catalog.stale {
            warn!(
                refreshed_at = %catalog.refreshed_at,
                "Provisioning against a stale catalog snapshot"
            );
        }

        for pool in self.pools.iter() {
            let eligible: Vec<WorkloadUnit> = pending
                .iter()
                .filter(|w| pool.admits(w))
                .cloned()
                .collect();
            if eligible.is_empty() {
                continue;
            }

            let candidates = catalog.candidates_for(pool);
            let committed = self.registry.pool_committed(pool.pool_id).await;
            match simulate(SimulatorInput {
                unplaced: &eligible,
                candidates: &candidates,
                committed: &committed,
                pool,
            }) {
                Ok(plan) if plan.is_empty() => continue,
                Ok(plan) => {
                    // At most one launch decision per cycle; remaining plan
                    // entries are recomputed from fresh state next cycle.
                    let entry = &plan.entries[0];
                    self.commit_entry(pool, entry, &eligible).await?;
                    summary.launched = Some(LaunchSummary {
                        pool: pool.name.clone(),
                        sku_id: entry.sku_id.clone(),
                        capacity_type: entry.capacity_type,
                        replicas: entry.replicas(),
                    });
                    return Ok(());
                }
                Err(infeasible) => {
                    warn!(
                        pool = %pool.name,
                        reason = ?infeasible.reason,
                        detail = %infeasible.detail,
                        "No feasible packing for pool"
                    );
                    summary.infeasible.push((pool.name.clone(), infeasible.reason));
                }
            }
        }
        Ok(())
    }

    async fn commit_entry(
        &self,
        pool: &NodePool,
        entry: &PlanEntry,
        eligible: &[WorkloadUnit],
    ) -> Result<(), ProvisionError> {
        info!(
            pool = %pool.name,
            sku_id = %entry.sku_id,
            capacity_type = %entry.capacity_type,
            zone = %entry.zone,
            replicas = entry.replicas(),
            price_per_hour = entry.price_per_hour,
            spec_hash = %pool.spec_hash,
            "Committing launch decision"
        );

        let demands: std::collections::HashMap<WorkloadId, &ResourceVector> = eligible
            .iter()
            .map(|w| (w.workload_id, &w.demands))
            .collect();
        for assignment in &entry.assignments {
            let requested = ResourceVector::sum(
                assignment.iter().filter_map(|id| demands.get(id).copied()),
            );
            let claim_id = self
                .create_claim(pool, entry, assignment.clone(), requested)
                .await?;
            self.launch_claim(pool, entry, claim_id).await?;
        }
        Ok(())
    }

    async fn create_claim(
        &self,
        pool: &NodePool,
        entry: &PlanEntry,
        workload_ids: Vec<WorkloadId>,
        requested: ResourceVector,
    ) -> Result<ClaimId, ProvisionError> {
        let claim = NodeClaim::new(
            pool.pool_id,
            vec![entry.sku_id.clone()],
            entry.capacity_type,
            entry.zone.clone(),
            entry.capacity_each.clone(),
            requested,
            workload_ids,
            entry.price_per_hour,
        );
        Ok(self.registry.insert_claim(claim).await)
    }

    /// Launch the instance backing a claim, retrying transient provider
    /// errors with backoff inside a bounded window. Any terminal outcome
    /// lands the claim in Launched or Failed; it never dangles in Launching.
    async fn launch_claim(
        &self,
        pool: &NodePool,
        entry: &PlanEntry,
        claim_id: ClaimId,
    ) -> Result<(), ProvisionError> {
        self.registry
            .transition_claim(claim_id, ClaimState::Launching, None)
            .await?;

        let request = LaunchRequest {
            sku_id: entry.sku_id.clone(),
            capacity_type: entry.capacity_type,
            zone: entry.zone.clone(),
            count: 1,
            tags: self.launch_tags(pool, claim_id),
        };

        let mut backoff = Backoff::new(
            self.tuning.launch_retry_base,
            self.tuning.launch_retry_max,
            self.tuning.launch_retry_window,
        );
        loop {
            match self.provider.launch(&request).await {
                Ok(handles) => {
                    let Some(handle) = handles.first() else {
                        warn!(claim_id = %claim_id, "Provider returned no instance handles");
                        self.registry
                            .transition_claim(
                                claim_id,
                                ClaimState::Failed,
                                Some(ClaimReason::LaunchFailed),
                            )
                            .await?;
                        return Ok(());
                    };
                    let deadline = Utc::now()
                        + chrono::Duration::from_std(pool.registration_timeout)
                            .unwrap_or_default();
                    self.registry
                        .set_claim_launched(claim_id, handle.instance_id.clone(), deadline)
                        .await?;
                    self.registry
                        .transition_claim(claim_id, ClaimState::Launched, None)
                        .await?;
                    info!(
                        claim_id = %claim_id,
                        instance_id = %handle.instance_id,
                        "Launch confirmed, awaiting registration"
                    );
                    return Ok(());
                }
                Err(e) if e.is_transient() => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            claim_id = %claim_id,
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "Transient launch failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(
                            claim_id = %claim_id,
                            attempts = backoff.attempts(),
                            "Launch retry window exhausted"
                        );
                        self.registry
                            .transition_claim(
                                claim_id,
                                ClaimState::Failed,
                                Some(ClaimReason::RetriesExhausted),
                            )
                            .await?;
                        return Ok(());
                    }
                },
                Err(e) => {
                    warn!(claim_id = %claim_id, error = %e, "Launch rejected by provider");
                    let reason = match e {
                        ProviderError::Permission(_) | ProviderError::InvalidSku(_) => {
                            ClaimReason::ProviderRejected
                        }
                        _ => ClaimReason::LaunchFailed,
                    };
                    self.registry
                        .transition_claim(claim_id, ClaimState::Failed, Some(reason))
                        .await?;
                    return Ok(());
                }
            }
        }
    }

    // -------------------------------------------------------------------
    // Replacements
    // -------------------------------------------------------------------

    /// Provision a replacement for a node about to be drained.
    ///
    /// The replacement must hold the node's current demand; with `max_price`
    /// set it must also be strictly cheaper, which is how the consolidation
    /// pass enforces that replacing actually saves money. The departing
    /// node's capacity is excluded from the limit check since it is on its
    /// way out.
    pub async fn provision_replacement(
        &self,
        node: &FleetNode,
        max_price: Option<f64>,
    ) -> Result<ClaimId, ProvisionError> {
        let pool = self
            .pools
            .get(node.pool_id)
            .ok_or(ProvisionError::UnknownPool(node.pool_id))?;

        let stand_in = WorkloadUnit {
            workload_id: WorkloadId::new(),
            name: format!("replacement-for-{}", node.node_id),
            demands: node.requested.clone(),
            constraints: PlacementConstraints::default(),
            priority: 0,
        };

        let catalog = self.catalog.load();
        let candidates = catalog.candidates_for(pool);
        let mut committed = self.registry.pool_committed(node.pool_id).await;
        committed.subtract(&node.allocatable);

        let plan = simulate(SimulatorInput {
            unplaced: std::slice::from_ref(&stand_in),
            candidates: &candidates,
            committed: &committed,
            pool,
        })?;
        let entry = &plan.entries[0];

        if let Some(current) = max_price {
            if entry.price_per_hour >= current {
                return Err(ProvisionError::ReplacementNotCheaper {
                    candidate: entry.price_per_hour,
                    current,
                });
            }
        }

        info!(
            node_id = %node.node_id,
            sku_id = %entry.sku_id,
            capacity_type = %entry.capacity_type,
            price_per_hour = entry.price_per_hour,
            "Provisioning replacement node"
        );
        let claim_id = self
            .create_claim(pool, entry, node.workloads.clone(), node.requested.clone())
            .await?;
        self.launch_claim(pool, entry, claim_id).await?;
        Ok(claim_id)
    }

    // -------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------

    fn launch_tags(
        &self,
        pool: &NodePool,
        claim_id: ClaimId,
    ) -> std::collections::BTreeMap<String, String> {
        let mut map = std::collections::BTreeMap::new();
        map.insert(tags::CLUSTER.to_string(), self.cluster.clone());
        map.insert(tags::POOL.to_string(), pool.pool_id.to_string());
        map.insert(tags::CLAIM.to_string(), claim_id.to_string());
        map
    }

    fn ownership_tags(&self, claim: &NodeClaim) -> std::collections::BTreeMap<String, String> {
        let mut map = std::collections::BTreeMap::new();
        map.insert(tags::CLUSTER.to_string(), self.cluster.clone());
        map.insert(tags::POOL.to_string(), claim.pool_id.to_string());
        map.insert(tags::CLAIM.to_string(), claim.claim_id.to_string());
        map
    }
}
