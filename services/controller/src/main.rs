//! Flotilla Fleet Controller
//!
//! The controller watches the orchestrator for unplaced workloads,
//! provisions right-sized nodes from the capacity catalog, and retires
//! nodes through consolidation and interruption handling.

use std::sync::Arc;

use anyhow::Result;
use flotilla_controller::{
    api,
    catalog::{Catalog, CatalogHandle, CatalogRefresher, CapacitySku, CapacityType, Offering, SkuLabels},
    config::Config,
    dispatch::{EventDispatcher, UnschedulableWatcher},
    disruption::{DisruptionController, DisruptionLedger, DisruptionTuning},
    interruption::InterruptionListener,
    orchestrator::{MockOrchestrator, Orchestrator},
    pool::PoolSet,
    provider::{CloudProvider, MockProvider},
    provisioner::{ProvisionTuning, ProvisionWorker, ProvisioningReconciler},
    registry::FleetRegistry,
    resources::ResourceVector,
    state::AppState,
};
use flotilla_events::EventBus;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to FLOTILLA_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting flotilla fleet controller");
    info!(listen_addr = %config.listen_addr, cluster = %config.cluster, "Configuration loaded");

    // Load pool definitions
    let pools = match PoolSet::load(&config.pool_file) {
        Ok(pools) => {
            info!(pool_count = pools.iter().count(), path = %config.pool_file.display(), "Pools loaded");
            Arc::new(pools)
        }
        Err(e) => {
            error!(error = %e, path = %config.pool_file.display(), "Failed to load pool definitions");
            return Err(e.into());
        }
    };

    // Wire up the cloud provider and orchestrator. The mock backends ship a
    // small built-in inventory so the controller is runnable standalone.
    let provider: Arc<dyn CloudProvider> = Arc::new(MockProvider::new(mock_inventory()));
    let orchestrator: Arc<dyn Orchestrator> = Arc::new(MockOrchestrator::new());
    let registry = Arc::new(FleetRegistry::new());

    // Capacity catalog starts empty and stale until the first refresh lands.
    let catalog = CatalogHandle::new(Catalog::empty());

    // Event bus plus the channels the dispatcher fans events out onto.
    let (bus, subscription) = EventBus::channel(config.event_capacity);
    let (notice_tx, notice_rx) = mpsc::channel(64);
    let (nudge_tx, nudge_rx) = mpsc::channel(16);

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start catalog refresher in background
    let refresher = CatalogRefresher::new(
        Arc::clone(&provider),
        catalog.clone(),
        config.catalog_refresh_interval,
    );
    let refresher_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            refresher.run(shutdown_rx).await;
        }
    });

    // Start event dispatcher in background
    let dispatcher = EventDispatcher::new(subscription, notice_tx, nudge_tx);
    let dispatcher_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            dispatcher.run(shutdown_rx).await;
        }
    });

    // Start provisioning loop in background
    let provisioner = Arc::new(ProvisioningReconciler::new(
        Arc::clone(&pools),
        catalog.clone(),
        Arc::clone(&registry),
        Arc::clone(&provider),
        Arc::clone(&orchestrator),
        bus.clone(),
        config.cluster.clone(),
        ProvisionTuning::default(),
    ));
    let provision_worker =
        ProvisionWorker::new(Arc::clone(&provisioner), config.reconcile_interval, nudge_rx);
    let provision_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            provision_worker.run(shutdown_rx).await;
        }
    });

    // Start disruption controller in background
    let disruption = Arc::new(DisruptionController::new(
        Arc::clone(&pools),
        Arc::clone(&registry),
        Arc::clone(&provider),
        Arc::clone(&orchestrator),
        Arc::clone(&provisioner),
        bus.clone(),
        DisruptionLedger::default(),
        DisruptionTuning {
            scan_interval: config.disruption_interval,
            ..Default::default()
        },
    ));
    let disruption_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            disruption.run(notice_rx, shutdown_rx).await;
        }
    });

    // Start interruption listener in background
    let interruption_listener = InterruptionListener::new(
        Arc::clone(&provider),
        Arc::clone(&registry),
        bus.clone(),
        config.interruption_poll_interval,
    );
    let listener_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            interruption_listener.run(shutdown_rx).await;
        }
    });

    // Start unschedulable-workload watcher in background
    let watcher = UnschedulableWatcher::new(
        Arc::clone(&orchestrator),
        bus.clone(),
        config.reconcile_interval,
    );
    let watcher_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            watcher.run(shutdown_rx).await;
        }
    });

    // Create application state
    let state = AppState::new(
        config.cluster.clone(),
        Arc::clone(&pools),
        Arc::clone(&registry),
        catalog.clone(),
    );

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    // Wait for workers to finish
    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    for (name, handle) in [
        ("Catalog refresher", refresher_handle),
        ("Event dispatcher", dispatcher_handle),
        ("Provisioning loop", provision_handle),
        ("Disruption controller", disruption_handle),
        ("Interruption listener", listener_handle),
        ("Unschedulable watcher", watcher_handle),
    ] {
        if let Err(e) = tokio::time::timeout(shutdown_timeout, handle).await {
            warn!(worker = name, error = %e, "Worker did not shut down in time");
        }
    }

    info!("Fleet controller shutdown complete");
    Ok(())
}

/// Built-in inventory for the mock provider: a small general-purpose family
/// plus a compute-optimized shape, each offered in one zone.
fn mock_inventory() -> Vec<CapacitySku> {
    fn sku(
        sku_id: &str,
        zone: &str,
        category: &str,
        cpu_millis: u64,
        memory_bytes: u64,
        spot: Option<f64>,
        on_demand: Option<f64>,
    ) -> CapacitySku {
        let mut offerings = std::collections::BTreeMap::new();
        if let Some(price_per_hour) = spot {
            offerings.insert(
                CapacityType::Spot,
                Offering {
                    price_per_hour,
                    available: true,
                },
            );
        }
        if let Some(price_per_hour) = on_demand {
            offerings.insert(
                CapacityType::OnDemand,
                Offering {
                    price_per_hour,
                    available: true,
                },
            );
        }
        let mut parts = sku_id.split('.');
        let family = parts.next().unwrap_or(sku_id).to_string();
        let size = parts.next().unwrap_or("").to_string();
        CapacitySku {
            sku_id: sku_id.to_string(),
            zone: zone.to_string(),
            capacity: ResourceVector::cpu_mem(cpu_millis, memory_bytes),
            labels: SkuLabels {
                family,
                size,
                category: category.to_string(),
            },
            offerings,
        }
    }

    vec![
        sku("m.small", "zone-a", "general", 2_000, 4 << 30, Some(0.012), Some(0.04)),
        sku("m.medium", "zone-a", "general", 4_000, 8 << 30, Some(0.024), Some(0.08)),
        sku("m.large", "zone-a", "general", 8_000, 16 << 30, Some(0.048), Some(0.16)),
        sku("m.large", "zone-b", "general", 8_000, 16 << 30, None, Some(0.16)),
        sku("c.large", "zone-a", "compute", 8_000, 8 << 30, Some(0.042), Some(0.14)),
        sku("c.xlarge", "zone-a", "compute", 16_000, 16 << 30, None, Some(0.28)),
    ]
}
