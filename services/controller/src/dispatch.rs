//! Event dispatch.
//!
//! The bus has a single subscription; this loop fans events out to the two
//! reconcilers. Interruption notices go to the disruption controller's
//! channel and are acknowledged only once handed off, so a notice is never
//! lost between the bus and its consumer. Everything else just nudges the
//! provisioning loop.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use flotilla_events::{EventBus, EventKind, FleetEvent, InterruptionNotice, Subscription};
use flotilla_id::WorkloadId;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::orchestrator::Orchestrator;

pub struct EventDispatcher {
    subscription: Subscription,
    notices: mpsc::Sender<InterruptionNotice>,
    nudge: mpsc::Sender<()>,
}

impl EventDispatcher {
    pub fn new(
        subscription: Subscription,
        notices: mpsc::Sender<InterruptionNotice>,
        nudge: mpsc::Sender<()>,
    ) -> Self {
        Self {
            subscription,
            notices,
            nudge,
        }
    }

    /// Run until shutdown or until the bus closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting event dispatcher");

        loop {
            tokio::select! {
                maybe = self.subscription.recv() => {
                    let Some(event) = maybe else {
                        info!("Event bus closed, dispatcher exiting");
                        break;
                    };
                    if !self.dispatch(&event).await {
                        // Leave the event unacknowledged; if the consumer is
                        // gone the process is shutting down anyway.
                        warn!(seq = %event.seq, "Dispatch failed, leaving event outstanding");
                        break;
                    }
                    if let Err(e) = self.subscription.ack(event.seq) {
                        warn!(seq = %event.seq, error = %e, "Failed to acknowledge event");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Event dispatcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn dispatch(&self, event: &FleetEvent) -> bool {
        debug!(
            seq = %event.seq,
            event_type = event.kind.event_type(),
            "Dispatching event"
        );
        match &event.kind {
            EventKind::InterruptionNotice(notice) => {
                self.notices.send(notice.clone()).await.is_ok()
            }
            EventKind::WorkloadsUnschedulable { .. } | EventKind::NodeRegistered { .. } => {
                // Nudges may be dropped when one is already queued; the
                // provisioning loop also ticks on its own interval.
                let _ = self.nudge.try_send(());
                true
            }
            EventKind::NodeDeregistered { .. } => true,
        }
    }
}

/// Watches the orchestrator for unschedulable workloads and announces
/// changes on the bus, so provisioning reacts faster than its interval.
pub struct UnschedulableWatcher {
    orchestrator: Arc<dyn Orchestrator>,
    bus: EventBus,
    poll_interval: Duration,
}

impl UnschedulableWatcher {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        bus: EventBus,
        poll_interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            bus,
            poll_interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting unschedulable-workload watcher"
        );

        let mut tick = tokio::time::interval(self.poll_interval);
        let mut last: BTreeSet<WorkloadId> = BTreeSet::new();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    last = self.observe(last).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Unschedulable-workload watcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One observation; publishes only when the unplaced set changed and is
    /// non-empty. Returns the set to compare against next time.
    pub async fn observe(&self, last: BTreeSet<WorkloadId>) -> BTreeSet<WorkloadId> {
        let current: BTreeSet<WorkloadId> = match self.orchestrator.unschedulable_workloads().await
        {
            Ok(workloads) => workloads.into_iter().map(|w| w.workload_id).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to poll unschedulable workloads");
                return last;
            }
        };

        if current != last && !current.is_empty() {
            let workload_ids: Vec<WorkloadId> = current.iter().copied().collect();
            debug!(count = workload_ids.len(), "Unplaced workload set changed");
            if let Err(e) = self
                .bus
                .publish(EventKind::WorkloadsUnschedulable { workload_ids })
                .await
            {
                warn!(error = %e, "Failed to publish unschedulable workloads");
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::MockOrchestrator;
    use crate::resources::ResourceVector;
    use crate::workload::{PlacementConstraints, WorkloadUnit};
    use chrono::Utc;
    use flotilla_events::InterruptionKind;
    use flotilla_id::{NodeId, NoticeId};

    fn sample_notice() -> InterruptionNotice {
        InterruptionNotice {
            notice_id: NoticeId::new(),
            node_id: NodeId::new(),
            kind: InterruptionKind::VoluntaryWarning,
            deadline: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_notices_routed_and_acked() {
        let (bus, sub) = EventBus::channel(16);
        let (notice_tx, mut notice_rx) = mpsc::channel(8);
        let (nudge_tx, mut nudge_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = EventDispatcher::new(sub, notice_tx, nudge_tx);
        let handle = tokio::spawn(dispatcher.run(shutdown_rx));

        let notice = sample_notice();
        bus.publish(EventKind::InterruptionNotice(notice.clone()))
            .await
            .unwrap();
        bus.publish(EventKind::NodeRegistered {
            node_id: NodeId::new(),
        })
        .await
        .unwrap();

        let routed = notice_rx.recv().await.unwrap();
        assert_eq!(routed.notice_id, notice.notice_id);
        assert!(nudge_rx.recv().await.is_some());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatcher_exits_when_bus_closes() {
        let (bus, sub) = EventBus::channel(4);
        let (notice_tx, _notice_rx) = mpsc::channel(8);
        let (nudge_tx, _nudge_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = EventDispatcher::new(sub, notice_tx, nudge_tx);
        let handle = tokio::spawn(dispatcher.run(shutdown_rx));

        drop(bus);
        handle.await.unwrap();
    }

    fn workload(name: &str) -> WorkloadUnit {
        WorkloadUnit {
            workload_id: flotilla_id::WorkloadId::new(),
            name: name.to_string(),
            demands: ResourceVector::cpu_mem(1000, 1 << 30),
            constraints: PlacementConstraints::default(),
            priority: 0,
        }
    }

    #[tokio::test]
    async fn test_watcher_publishes_only_on_change() {
        let orchestrator = Arc::new(MockOrchestrator::new());
        let (bus, mut sub) = EventBus::channel(16);
        let watcher = UnschedulableWatcher::new(
            Arc::clone(&orchestrator) as Arc<dyn Orchestrator>,
            bus,
            Duration::from_secs(5),
        );

        // Empty set: nothing published.
        let last = watcher.observe(BTreeSet::new()).await;
        assert!(sub.try_recv().is_none());

        // New unplaced workload: published once.
        let w = workload("web");
        let workload_id = w.workload_id;
        orchestrator.set_unschedulable(vec![w]);
        let last = watcher.observe(last).await;
        let event = sub.try_recv().unwrap();
        match &event.kind {
            EventKind::WorkloadsUnschedulable { workload_ids } => {
                assert_eq!(workload_ids, &vec![workload_id]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        sub.ack(event.seq).unwrap();

        // Unchanged set: no duplicate announcement.
        let last = watcher.observe(last).await;
        assert!(sub.try_recv().is_none());

        // Set emptied: still quiet.
        orchestrator.set_unschedulable(Vec::new());
        let _ = watcher.observe(last).await;
        assert!(sub.try_recv().is_none());
    }
}
