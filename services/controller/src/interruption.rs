//! Interruption listener.
//!
//! Polls the provider's raw signal feed, resolves each signal to a fleet
//! node, and publishes normalized [`InterruptionNotice`] events on the bus.
//! Signals for instances the registry does not know as nodes are dropped;
//! an interrupted instance that never registers is reclaimed by the claim's
//! registration deadline instead.

use std::sync::Arc;
use std::time::Duration;

use flotilla_events::{EventBus, EventKind, InterruptionNotice};
use flotilla_id::NoticeId;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::provider::CloudProvider;
use crate::registry::FleetRegistry;

pub struct InterruptionListener {
    provider: Arc<dyn CloudProvider>,
    registry: Arc<FleetRegistry>,
    bus: EventBus,
    poll_interval: Duration,
}

impl InterruptionListener {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        registry: Arc<FleetRegistry>,
        bus: EventBus,
        poll_interval: Duration,
    ) -> Self {
        Self {
            provider,
            registry,
            bus,
            poll_interval,
        }
    }

    /// Run the polling loop until shutdown is signaled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting interruption listener"
        );

        let mut tick = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Interruption listener shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Drain the provider feed once. Returns how many notices were published.
    pub async fn poll_once(&self) -> usize {
        let raws = match self.provider.poll_interruptions().await {
            Ok(raws) => raws,
            Err(e) => {
                warn!(error = %e, "Failed to poll interruption feed");
                return 0;
            }
        };

        let mut published = 0;
        for raw in raws {
            let Some(node) = self.registry.node_by_instance(&raw.instance_id).await else {
                debug!(
                    instance_id = %raw.instance_id,
                    kind = %raw.kind,
                    "Interruption for instance with no registered node, dropping"
                );
                continue;
            };

            let notice = InterruptionNotice {
                notice_id: NoticeId::new(),
                node_id: node.node_id,
                kind: raw.kind,
                deadline: raw.deadline,
            };
            info!(
                notice_id = %notice.notice_id,
                node_id = %node.node_id,
                instance_id = %raw.instance_id,
                kind = %raw.kind,
                "Publishing interruption notice"
            );
            if let Err(e) = self.bus.publish(EventKind::InterruptionNotice(notice)).await {
                warn!(error = %e, "Failed to publish interruption notice");
                return published;
            }
            published += 1;
        }
        published
    }
}
