//! The provisioning loop: periodic reconcile cycles plus nudges.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::ProvisioningReconciler;

/// Drives the provisioning reconciler.
///
/// A cycle runs on every interval tick and immediately on a nudge from the
/// event dispatcher, so new unschedulable workloads or registrations do not
/// wait out the full interval.
pub struct ProvisionWorker {
    reconciler: Arc<ProvisioningReconciler>,
    interval: Duration,
    nudge: mpsc::Receiver<()>,
}

impl ProvisionWorker {
    pub fn new(
        reconciler: Arc<ProvisioningReconciler>,
        interval: Duration,
        nudge: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            reconciler,
            interval,
            nudge,
        }
    }

    /// Run until shutdown is signaled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting provisioning loop"
        );

        let mut tick = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.reconciler.reconcile_once().await;
                }
                Some(()) = self.nudge.recv() => {
                    debug!("Provisioning loop nudged");
                    // Collapse a burst of nudges into one cycle.
                    while self.nudge.try_recv().is_ok() {}
                    self.reconciler.reconcile_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Provisioning loop shutting down");
                        break;
                    }
                }
            }
        }
    }
}
