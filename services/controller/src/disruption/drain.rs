//! Cooperative node drain.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::orchestrator::{EvictionOutcome, Orchestrator, OrchestratorError};
use crate::registry::{FleetNode, FleetRegistry, NodeState};

/// How a drain attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainResult {
    /// Every workload was evicted.
    Completed,

    /// The timeout elapsed with workloads still blocked by their own
    /// disruption budgets.
    TimedOut { remaining: usize },
}

/// Evicts workloads off a node, respecting their disruption budgets.
pub struct Drainer {
    orchestrator: Arc<dyn Orchestrator>,
    registry: Arc<FleetRegistry>,

    /// Pause between retry rounds for blocked evictions.
    retry_delay: Duration,
}

impl Drainer {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        registry: Arc<FleetRegistry>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            orchestrator,
            registry,
            retry_delay,
        }
    }

    /// Cordon the node and evict its workloads.
    ///
    /// Blocked evictions are retried until `timeout` elapses. Eviction here
    /// is always cooperative; when the caller knows the node is already lost
    /// it skips the drain entirely rather than forcing one.
    pub async fn drain(
        &self,
        node: &FleetNode,
        timeout: Duration,
    ) -> Result<DrainResult, OrchestratorError> {
        info!(
            node_id = %node.node_id,
            workloads = node.workloads.len(),
            timeout_secs = timeout.as_secs(),
            "Draining node"
        );

        self.orchestrator.cordon(node.node_id).await?;
        if let Err(e) = self
            .registry
            .set_node_state(node.node_id, NodeState::Draining)
            .await
        {
            warn!(node_id = %node.node_id, error = %e, "Node vanished before drain");
            return Ok(DrainResult::Completed);
        }

        let deadline = Instant::now() + timeout;
        let mut pending = node.workloads.clone();

        loop {
            let mut blocked = Vec::new();
            for workload_id in pending {
                match self.orchestrator.evict(workload_id).await? {
                    EvictionOutcome::Evicted => {
                        debug!(workload_id = %workload_id, "Workload evicted");
                    }
                    EvictionOutcome::Blocked => blocked.push(workload_id),
                }
            }

            if blocked.is_empty() {
                info!(node_id = %node.node_id, "Drain complete");
                return Ok(DrainResult::Completed);
            }

            if Instant::now() + self.retry_delay > deadline {
                warn!(
                    node_id = %node.node_id,
                    remaining = blocked.len(),
                    "Drain timed out with evictions still blocked"
                );
                return Ok(DrainResult::TimedOut {
                    remaining: blocked.len(),
                });
            }

            debug!(
                node_id = %node.node_id,
                blocked = blocked.len(),
                "Evictions blocked, retrying"
            );
            tokio::time::sleep(self.retry_delay).await;
            pending = blocked;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CapacityType;
    use crate::orchestrator::MockOrchestrator;
    use crate::provider::tags;
    use crate::resources::ResourceVector;
    use chrono::Utc;
    use flotilla_id::{ClaimId, NodeId, PoolId, WorkloadId};
    use std::collections::BTreeMap;

    fn node(workloads: Vec<WorkloadId>) -> FleetNode {
        let mut tag_map = BTreeMap::new();
        tag_map.insert(tags::CLUSTER.to_string(), "test".to_string());
        tag_map.insert(tags::POOL.to_string(), "pool".to_string());
        FleetNode {
            node_id: NodeId::new(),
            claim_id: ClaimId::new(),
            pool_id: PoolId::new(),
            instance_id: "i-1".to_string(),
            sku_id: "m5.large".to_string(),
            capacity_type: CapacityType::Spot,
            zone: "zone-a".to_string(),
            launched_at: Utc::now(),
            registered_at: Utc::now(),
            state: crate::registry::NodeState::Ready,
            allocatable: ResourceVector::cpu_mem(2000, 8 << 30),
            requested: ResourceVector::cpu_mem(1000, 4 << 30),
            workloads,
            tags: tag_map,
            price_per_hour: 0.05,
        }
    }

    async fn registry_with(node: &FleetNode) -> Arc<FleetRegistry> {
        let registry = Arc::new(FleetRegistry::new());
        let claim = crate::registry::NodeClaim::new(
            node.pool_id,
            vec![node.sku_id.clone()],
            node.capacity_type,
            node.zone.clone(),
            node.allocatable.clone(),
            node.requested.clone(),
            node.workloads.clone(),
            node.price_per_hour,
        );
        let claim_id = registry.insert_claim(claim).await;
        for state in [
            crate::registry::ClaimState::Launching,
            crate::registry::ClaimState::Launched,
            crate::registry::ClaimState::Registering,
        ] {
            registry.transition_claim(claim_id, state, None).await.unwrap();
        }
        let mut bound = node.clone();
        bound.claim_id = claim_id;
        registry.bind_registration(claim_id, bound).await.unwrap();
        registry
    }

    #[tokio::test]
    async fn test_drain_evicts_all_workloads() {
        let orchestrator = Arc::new(MockOrchestrator::new());
        let workloads = vec![WorkloadId::new(), WorkloadId::new()];
        let node = node(workloads.clone());
        let registry = registry_with(&node).await;

        let drainer = Drainer::new(
            Arc::clone(&orchestrator) as Arc<dyn Orchestrator>,
            registry,
            Duration::from_millis(1),
        );
        let result = drainer.drain(&node, Duration::from_secs(5)).await.unwrap();

        assert_eq!(result, DrainResult::Completed);
        assert_eq!(orchestrator.cordoned(), vec![node.node_id]);
        let journal = orchestrator.eviction_journal();
        for workload_id in &workloads {
            assert!(journal.contains(workload_id));
        }
    }

    #[tokio::test]
    async fn test_blocked_eviction_retried_until_clear() {
        let orchestrator = Arc::new(MockOrchestrator::new());
        let stubborn = WorkloadId::new();
        let node = node(vec![stubborn]);
        let registry = registry_with(&node).await;
        orchestrator.block_evictions(stubborn, 2);

        let drainer = Drainer::new(
            Arc::clone(&orchestrator) as Arc<dyn Orchestrator>,
            registry,
            Duration::from_millis(1),
        );
        let result = drainer.drain(&node, Duration::from_secs(5)).await.unwrap();

        assert_eq!(result, DrainResult::Completed);
        assert_eq!(orchestrator.eviction_journal().len(), 3);
    }

    #[tokio::test]
    async fn test_drain_times_out_on_permanently_blocked() {
        let orchestrator = Arc::new(MockOrchestrator::new());
        let stubborn = WorkloadId::new();
        let node = node(vec![stubborn]);
        let registry = registry_with(&node).await;
        orchestrator.block_evictions(stubborn, u32::MAX);

        let drainer = Drainer::new(
            Arc::clone(&orchestrator) as Arc<dyn Orchestrator>,
            registry,
            Duration::from_millis(5),
        );
        let result = drainer
            .drain(&node, Duration::from_millis(20))
            .await
            .unwrap();

        assert_eq!(result, DrainResult::TimedOut { remaining: 1 });
    }
}
