//! Consolidation scans and interruption notice handling.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use flotilla_events::{EventBus, EventError, EventKind, InterruptionNotice};
use flotilla_id::{ClaimId, NoticeId};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{DisruptionLedger, DrainResult, Drainer};
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::pool::{NodePool, PoolSet};
use crate::provider::{CloudProvider, ProviderError};
use crate::provisioner::{ProvisionError, ProvisioningReconciler};
use crate::registry::{
    ClaimReason, ClaimState, FleetNode, FleetRegistry, NodeState, RegistryError,
};

/// Errors from disruption operations.
#[derive(Debug, Error)]
pub enum DisruptionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Bus(#[from] EventError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Timing knobs for the disruption controller.
#[derive(Debug, Clone)]
pub struct DisruptionTuning {
    /// How often the consolidation scan runs.
    pub scan_interval: Duration,

    /// How long to wait for a replacement claim to reach Ready.
    pub replacement_wait: Duration,

    /// Drain budget for consolidation (interruption drains are bounded by
    /// the notice deadline instead).
    pub drain_timeout: Duration,

    /// Pause between eviction retry rounds.
    pub evict_retry_delay: Duration,

    /// Poll interval while waiting on a claim.
    pub claim_poll_interval: Duration,
}

impl Default for DisruptionTuning {
    fn default() -> Self {
        Self {
            scan_interval: flotilla_reconcile::DEFAULT_DISRUPTION_INTERVAL,
            replacement_wait: Duration::from_secs(120),
            drain_timeout: Duration::from_secs(60),
            evict_retry_delay: Duration::from_secs(2),
            claim_poll_interval: Duration::from_millis(500),
        }
    }
}

/// The disruption controller.
///
/// Runs the periodic consolidation scan and consumes interruption notices.
/// All capacity it retires goes through the registry's ownership guard, and
/// new capacity is requested from the provisioning reconciler rather than
/// launched directly.
pub struct DisruptionController {
    pools: Arc<PoolSet>,
    registry: Arc<FleetRegistry>,
    provider: Arc<dyn CloudProvider>,
    orchestrator: Arc<dyn Orchestrator>,
    provisioner: Arc<ProvisioningReconciler>,
    bus: EventBus,
    ledger: DisruptionLedger,
    drainer: Drainer,
    tuning: DisruptionTuning,

    /// Notice IDs already handled; redeliveries are dropped here.
    seen_notices: Mutex<HashSet<NoticeId>>,
}

impl DisruptionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pools: Arc<PoolSet>,
        registry: Arc<FleetRegistry>,
        provider: Arc<dyn CloudProvider>,
        orchestrator: Arc<dyn Orchestrator>,
        provisioner: Arc<ProvisioningReconciler>,
        bus: EventBus,
        ledger: DisruptionLedger,
        tuning: DisruptionTuning,
    ) -> Self {
        let drainer = Drainer::new(
            Arc::clone(&orchestrator),
            Arc::clone(&registry),
            tuning.evict_retry_delay,
        );
        Self {
            pools,
            registry,
            provider,
            orchestrator,
            provisioner,
            bus,
            ledger,
            drainer,
            tuning,
            seen_notices: Mutex::new(HashSet::new()),
        }
    }

    /// Run until shutdown: consolidation on the scan interval, interruption
    /// notices as they arrive.
    pub async fn run(
        &self,
        mut notices: mpsc::Receiver<InterruptionNotice>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            scan_interval_secs = self.tuning.scan_interval.as_secs(),
            "Starting disruption controller"
        );

        let mut tick = tokio::time::interval(self.tuning.scan_interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.consolidate_once().await;
                }
                Some(notice) = notices.recv() => {
                    if let Err(e) = self.handle_notice(notice).await {
                        warn!(error = %e, "Interruption handling failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Disruption controller shutting down");
                        break;
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------
    // Interruption notices
    // -------------------------------------------------------------------

    /// React to one interruption notice.
    ///
    /// Notices arrive at-least-once; duplicates and notices for nodes the
    /// registry no longer knows are dropped silently.
    pub async fn handle_notice(&self, notice: InterruptionNotice) -> Result<(), DisruptionError> {
        if !self.seen_notices.lock().unwrap().insert(notice.notice_id) {
            debug!(notice_id = %notice.notice_id, "Duplicate notice, ignoring");
            return Ok(());
        }

        let Some(node) = self.registry.get_node(notice.node_id).await else {
            debug!(node_id = %notice.node_id, "Notice for unknown node, ignoring");
            return Ok(());
        };

        info!(
            notice_id = %notice.notice_id,
            node_id = %node.node_id,
            kind = %notice.kind,
            deadline = %notice.deadline,
            "Handling interruption notice"
        );

        // Counted against the pool's concurrency but never blocked: the
        // provider reclaims this capacity whether the budget likes it or not.
        let _permit = self.ledger.acquire_forced(node.pool_id);

        if notice.kind.is_involuntary() {
            warn!(
                node_id = %node.node_id,
                instance_id = %node.instance_id,
                "Instance already lost, deregistering without drain"
            );
            self.decommission(&node).await
        } else {
            self.replace_and_drain(&node, notice.deadline).await
        }
    }

    /// Voluntary interruption: get a replacement up before the deadline if
    /// possible, then drain cooperatively and retire the node. Both steps
    /// are best-effort against the clock; the node is retired either way.
    async fn replace_and_drain(
        &self,
        node: &FleetNode,
        deadline: DateTime<Utc>,
    ) -> Result<(), DisruptionError> {
        match self.provisioner.provision_replacement(node, None).await {
            Ok(claim_id) => {
                let wait = until(deadline).min(self.tuning.replacement_wait);
                if !self.await_claim_ready(claim_id, wait).await {
                    warn!(
                        claim_id = %claim_id,
                        "Replacement not ready before the deadline, draining anyway"
                    );
                }
            }
            Err(e) => {
                warn!(node_id = %node.node_id, error = %e, "Could not provision replacement");
            }
        }

        let drain_budget = until(deadline).min(self.tuning.drain_timeout);
        if let DrainResult::TimedOut { remaining } =
            self.drainer.drain(node, drain_budget).await?
        {
            warn!(
                node_id = %node.node_id,
                remaining,
                "Deadline reached with workloads still on the node"
            );
        }
        self.decommission(node).await
    }

    // -------------------------------------------------------------------
    // Consolidation
    // -------------------------------------------------------------------

    /// One consolidation scan over every consolidation-enabled pool.
    pub async fn consolidate_once(&self) {
        for pool in self.pools.iter() {
            if !pool.disruption.consolidation {
                continue;
            }
            if let Err(e) = self.consolidate_pool(pool).await {
                warn!(pool = %pool.name, error = %e, "Consolidation pass failed");
            }
        }
    }

    /// Consolidate at most one node of a pool per scan: the emptiest,
    /// least-utilized owned node below the pool threshold.
    async fn consolidate_pool(&self, pool: &NodePool) -> Result<(), DisruptionError> {
        let nodes = self.registry.pool_nodes(pool.pool_id).await;
        let mut candidates: Vec<&FleetNode> = nodes
            .iter()
            .filter(|n| n.state == NodeState::Ready && n.is_owned())
            .filter(|n| {
                n.is_empty() || n.utilization() < pool.disruption.underutilization_threshold
            })
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }

        candidates.sort_by(|a, b| {
            b.is_empty()
                .cmp(&a.is_empty())
                .then(
                    a.utilization()
                        .partial_cmp(&b.utilization())
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.node_id.cmp(&b.node_id))
        });
        let node = candidates[0];

        let Some(_permit) = self
            .ledger
            .try_acquire(pool.pool_id, pool.disruption.max_concurrent)
        else {
            debug!(pool = %pool.name, "Pool at its disruption ceiling, skipping scan");
            return Ok(());
        };

        if node.is_empty() {
            info!(node_id = %node.node_id, pool = %pool.name, "Retiring empty node");
            return self.decommission(node).await;
        }

        self.consolidate_node(pool, node).await
    }

    async fn consolidate_node(
        &self,
        pool: &NodePool,
        node: &FleetNode,
    ) -> Result<(), DisruptionError> {
        info!(
            node_id = %node.node_id,
            utilization = node.utilization(),
            price_per_hour = node.price_per_hour,
            "Attempting consolidation"
        );

        let claim_id = match self
            .provisioner
            .provision_replacement(node, Some(node.price_per_hour))
            .await
        {
            Ok(claim_id) => claim_id,
            Err(ProvisionError::ReplacementNotCheaper { candidate, current }) => {
                debug!(
                    node_id = %node.node_id,
                    candidate,
                    current,
                    "No cheaper replacement, keeping node"
                );
                return Ok(());
            }
            Err(ProvisionError::ReplacementInfeasible(infeasible)) => {
                debug!(
                    node_id = %node.node_id,
                    reason = ?infeasible.reason,
                    "No feasible replacement, keeping node"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if !self
            .await_claim_ready(claim_id, self.tuning.replacement_wait)
            .await
        {
            warn!(
                claim_id = %claim_id,
                "Replacement did not become ready, aborting consolidation"
            );
            self.release_replacement(claim_id).await;
            return Ok(());
        }

        // Conditions may have shifted while the replacement registered.
        let still_eligible = match self.registry.get_node(node.node_id).await {
            Some(current) => {
                current.state == NodeState::Ready
                    && current.utilization() < pool.disruption.underutilization_threshold
            }
            None => false,
        };
        if !still_eligible {
            info!(
                node_id = %node.node_id,
                "Node no longer consolidation-eligible, releasing replacement"
            );
            self.release_replacement(claim_id).await;
            return Ok(());
        }

        match self.drainer.drain(node, self.tuning.drain_timeout).await? {
            DrainResult::Completed => self.decommission(node).await,
            DrainResult::TimedOut { remaining } => {
                warn!(
                    node_id = %node.node_id,
                    remaining,
                    "Drain blocked by workload budgets, rolling back"
                );
                self.orchestrator.uncordon(node.node_id).await?;
                self.registry
                    .set_node_state(node.node_id, NodeState::Ready)
                    .await?;
                // The replacement stays: it is already absorbing evicted
                // workloads, and if it ends up empty a later scan retires it.
                Ok(())
            }
        }
    }

    // -------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------

    /// Retire a node: terminate the instance, deregister the orchestrator
    /// node object, drop it from the inventory, and announce the departure.
    /// The ownership guard runs first; a node without our tags is never
    /// terminated.
    async fn decommission(&self, node: &FleetNode) -> Result<(), DisruptionError> {
        let node = self.registry.ensure_terminable(node.node_id).await?;
        self.registry
            .set_node_state(node.node_id, NodeState::Terminated)
            .await?;
        self.provider.terminate(&node.instance_id).await?;
        self.orchestrator.deregister(node.node_id).await?;
        self.registry.remove_node(node.node_id).await;
        self.bus
            .publish(EventKind::NodeDeregistered {
                node_id: node.node_id,
            })
            .await?;
        info!(node_id = %node.node_id, instance_id = %node.instance_id, "Node retired");
        Ok(())
    }

    /// Poll a claim until it reaches Ready. Returns false on Failed, on a
    /// vanished claim, or when the timeout elapses.
    async fn await_claim_ready(&self, claim_id: ClaimId, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.registry.get_claim(claim_id).await {
                Some(claim) if claim.state == ClaimState::Ready => return true,
                Some(claim) if claim.state == ClaimState::Failed => return false,
                Some(_) => {}
                None => return false,
            }
            if tokio::time::Instant::now() + self.tuning.claim_poll_interval > deadline {
                return false;
            }
            tokio::time::sleep(self.tuning.claim_poll_interval).await;
        }
    }

    /// Best-effort rollback of a replacement that is no longer wanted.
    async fn release_replacement(&self, claim_id: ClaimId) {
        let Some(claim) = self.registry.get_claim(claim_id).await else {
            return;
        };

        // Already registered: retire the node through the normal path.
        if let Some(node_id) = claim.node_id {
            if let Some(node) = self.registry.get_node(node_id).await {
                if let Err(e) = self.decommission(&node).await {
                    warn!(claim_id = %claim_id, error = %e, "Failed to retire unwanted replacement");
                }
                return;
            }
        }

        if let Some(instance_id) = &claim.instance_id {
            if let Err(e) = self.provider.terminate(instance_id).await {
                warn!(claim_id = %claim_id, error = %e, "Failed to terminate unwanted replacement");
            }
        }
        if !claim.state.is_terminal() {
            if let Err(e) = self
                .registry
                .transition_claim(claim_id, ClaimState::Failed, Some(ClaimReason::Released))
                .await
            {
                warn!(claim_id = %claim_id, error = %e, "Failed to release replacement claim");
            }
        }
    }
}

/// Time left until a wall-clock deadline, zero if it already passed.
fn until(deadline: DateTime<Utc>) -> Duration {
    (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}
