//! Integration tests for the provisioning flow.
//!
//! These tests run the full path from unplaced workloads to ready nodes:
//! 1. The orchestrator reports unschedulable workloads
//! 2. The reconciler packs them against the catalog and launches claims
//! 3. Registration signals bind claims to fleet nodes
//!
//! Uses the mock provider and mock orchestrator.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use flotilla_controller::catalog::{
    CapacitySku, CapacityType, Catalog, CatalogHandle, CatalogRefresher, Offering, SkuLabels,
};
use flotilla_controller::orchestrator::{MockOrchestrator, NodeRegistration, Orchestrator};
use flotilla_controller::pool::PoolSet;
use flotilla_controller::provider::{CloudProvider, MockProvider};
use flotilla_controller::provisioner::{ProvisionTuning, ProvisioningReconciler};
use flotilla_controller::registry::{ClaimState, FleetRegistry, NodeState};
use flotilla_controller::resources::ResourceVector;
use flotilla_controller::workload::WorkloadUnit;
use flotilla_events::{EventBus, EventKind, Subscription};
use flotilla_id::NodeId;

const POOLS: &str = r#"
[[pool]]
name = "general"

[pool.requirements]
categories = ["general"]

[pool.limits]
cpu_millis = 64000
memory_bytes = 137438953472
"#;

fn sku(id: &str, cpu_millis: u64, memory_bytes: u64, spot: Option<f64>) -> CapacitySku {
    let mut offerings = BTreeMap::new();
    if let Some(price_per_hour) = spot {
        offerings.insert(
            CapacityType::Spot,
            Offering {
                price_per_hour,
                available: true,
            },
        );
    }
    offerings.insert(
        CapacityType::OnDemand,
        Offering {
            price_per_hour: spot.unwrap_or(0.02) * 4.0,
            available: true,
        },
    );
    CapacitySku {
        sku_id: id.to_string(),
        zone: "zone-a".to_string(),
        capacity: ResourceVector::cpu_mem(cpu_millis, memory_bytes),
        labels: SkuLabels {
            family: id.split('.').next().unwrap_or(id).to_string(),
            size: id.split('.').nth(1).unwrap_or("").to_string(),
            category: "general".to_string(),
        },
        offerings,
    }
}

fn workload(name: &str, cpu_millis: u64, memory_bytes: u64) -> WorkloadUnit {
    WorkloadUnit {
        workload_id: flotilla_id::WorkloadId::new(),
        name: name.to_string(),
        demands: ResourceVector::cpu_mem(cpu_millis, memory_bytes),
        constraints: Default::default(),
        priority: 0,
    }
}

struct Harness {
    reconciler: ProvisioningReconciler,
    provider: Arc<MockProvider>,
    orchestrator: Arc<MockOrchestrator>,
    registry: Arc<FleetRegistry>,
    subscription: Subscription,
}

async fn harness(pool_toml: &str, skus: Vec<CapacitySku>) -> Harness {
    let pools = Arc::new(PoolSet::parse(pool_toml).unwrap());
    let provider = Arc::new(MockProvider::new(skus));
    let orchestrator = Arc::new(MockOrchestrator::new());
    let registry = Arc::new(FleetRegistry::new());

    // Populate the catalog through the refresher, as production does.
    let catalog = CatalogHandle::new(Catalog::empty());
    let refresher = CatalogRefresher::new(
        Arc::clone(&provider) as Arc<dyn CloudProvider>,
        catalog.clone(),
        Duration::from_secs(60),
    );
    refresher.refresh_once().await;
    assert!(!catalog.load().stale);

    let (bus, subscription) = EventBus::channel(64);
    let reconciler = ProvisioningReconciler::new(
        pools,
        catalog,
        Arc::clone(&registry),
        Arc::clone(&provider) as Arc<dyn CloudProvider>,
        Arc::clone(&orchestrator) as Arc<dyn Orchestrator>,
        bus,
        "itest".to_string(),
        ProvisionTuning::default(),
    );

    Harness {
        reconciler,
        provider,
        orchestrator,
        registry,
        subscription,
    }
}

#[tokio::test]
async fn test_unplaced_workloads_become_ready_nodes() {
    let mut h = harness(POOLS, vec![sku("m.large", 8000, 16 << 30, Some(0.05))]).await;

    h.orchestrator.set_unschedulable(vec![
        workload("web-1", 2000, 4 << 30),
        workload("web-2", 2000, 4 << 30),
        workload("web-3", 2000, 4 << 30),
    ]);

    // First cycle: pack and launch.
    let summary = h.reconciler.reconcile_once().await;
    let launched = summary.launched.expect("expected a launch decision");
    assert_eq!(launched.sku_id, "m.large");
    assert_eq!(launched.capacity_type, CapacityType::Spot);

    let claims = h.registry.list_claims().await;
    assert_eq!(claims.len(), launched.replicas as usize);
    for claim in &claims {
        assert_eq!(claim.state, ClaimState::Launched);
        assert!(claim.instance_id.is_some());
    }
    assert_eq!(h.provider.launch_journal().len(), launched.replicas as usize);

    // Instances join the cluster; the placed workloads leave the
    // unschedulable snapshot.
    for claim in &claims {
        h.orchestrator.push_registration(NodeRegistration {
            instance_id: claim.instance_id.clone().unwrap(),
            node_id: NodeId::new(),
            allocatable: claim.capacity.clone(),
            schedulable: true,
        });
        h.orchestrator.mark_scheduled(&claim.workload_ids);
    }

    // Second cycle: bind registrations.
    let summary = h.reconciler.reconcile_once().await;
    assert_eq!(summary.bound, claims.len());
    assert!(summary.launched.is_none());

    let nodes = h.registry.list_nodes().await;
    assert_eq!(nodes.len(), claims.len());
    for node in &nodes {
        assert_eq!(node.state, NodeState::Ready);
        assert!(node.is_owned());
        assert!(!node.workloads.is_empty());
    }
    for claim in h.registry.list_claims().await {
        assert_eq!(claim.state, ClaimState::Ready);
    }

    // One registered event per bound node.
    let mut registered = 0;
    while let Some(event) = h.subscription.try_recv() {
        if matches!(event.kind, EventKind::NodeRegistered { .. }) {
            registered += 1;
        }
        h.subscription.ack(event.seq).unwrap();
    }
    assert_eq!(registered, claims.len());

    // Steady state: nothing left to provision.
    let summary = h.reconciler.reconcile_once().await;
    assert!(summary.launched.is_none());
    assert!(summary.convergence().is_converged());
    assert_eq!(h.provider.launch_journal().len(), claims.len());
}

#[tokio::test]
async fn test_missed_registration_deadline_fails_claim_and_reclaims_instance() {
    let pool_toml = r#"
[[pool]]
name = "general"
registration_timeout_secs = 0

[pool.requirements]
categories = ["general"]
"#;
    let h = harness(pool_toml, vec![sku("m.small", 2000, 4 << 30, Some(0.01))]).await;

    h.orchestrator
        .set_unschedulable(vec![workload("web-1", 1000, 1 << 30)]);
    h.reconciler.reconcile_once().await;

    let claim = h.registry.list_claims().await.remove(0);
    let instance_id = claim.instance_id.clone().unwrap();
    assert!(h.provider.is_live(&instance_id));

    // The zero-second deadline has already passed by the next cycle.
    let summary = h.reconciler.reconcile_once().await;
    assert_eq!(summary.expired, 1);

    let claim = h.registry.get_claim(claim.claim_id).await.unwrap();
    assert_eq!(claim.state, ClaimState::Failed);
    assert!(!h.provider.is_live(&instance_id));
    assert!(h.provider.terminate_journal().contains(&instance_id));
}

#[tokio::test]
async fn test_oversized_workload_reported_infeasible() {
    let h = harness(POOLS, vec![sku("m.small", 2000, 4 << 30, Some(0.01))]).await;

    h.orchestrator
        .set_unschedulable(vec![workload("hungry", 32000, 64 << 30)]);

    let summary = h.reconciler.reconcile_once().await;
    assert!(summary.launched.is_none());
    assert!(!summary.infeasible.is_empty());
    assert!(h.registry.list_claims().await.is_empty());
    assert!(h.provider.launch_journal().is_empty());
}
