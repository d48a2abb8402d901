//! The fleet event bus: an ordered, at-least-once delivery channel.
//!
//! The bus connects the interruption listener and the orchestrator watchers
//! to the reconciliation loops. Publishing assigns a globally monotonic
//! sequence number; the subscription delivers events in publish order and
//! requires an explicit acknowledgment per event. An event received but not
//! acknowledged is redelivered on the next receive, so a consumer that fails
//! mid-processing can pick the event back up after retrying.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use flotilla_id::EventSeq;
use tokio::sync::mpsc;

use crate::{EventError, EventKind, FleetEvent};

/// Publisher handle for the fleet event bus. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<FleetEvent>,
    next_seq: Arc<AtomicU64>,
}

/// Consumer side of the bus. Single consumer; delivery order is publish order.
pub struct Subscription {
    rx: mpsc::Receiver<FleetEvent>,

    /// Delivered but not yet acknowledged. Redelivered on the next receive.
    outstanding: Option<FleetEvent>,
}

impl EventBus {
    /// Creates a bus with the given channel capacity and returns the
    /// publisher handle together with its single subscription.
    pub fn channel(capacity: usize) -> (Self, Subscription) {
        let (tx, rx) = mpsc::channel(capacity);
        let bus = Self {
            tx,
            next_seq: Arc::new(AtomicU64::new(1)),
        };
        let sub = Subscription {
            rx,
            outstanding: None,
        };
        (bus, sub)
    }

    /// Publishes an event, assigning it the next sequence number.
    ///
    /// Suspends if the channel is full; the bus never drops events.
    pub async fn publish(&self, kind: EventKind) -> Result<EventSeq, EventError> {
        let seq = EventSeq::new(self.next_seq.fetch_add(1, Ordering::SeqCst));
        let event = FleetEvent {
            seq,
            occurred_at: Utc::now(),
            kind,
        };
        self.tx.send(event).await.map_err(|_| EventError::Closed)?;
        Ok(seq)
    }
}

impl Subscription {
    /// Receives the next event in sequence order.
    ///
    /// If the previous delivery was never acknowledged it is redelivered
    /// instead of advancing, which is what makes delivery at-least-once.
    /// Returns `None` once all publishers are dropped and the channel is
    /// drained.
    pub async fn recv(&mut self) -> Option<FleetEvent> {
        if let Some(event) = &self.outstanding {
            return Some(event.clone());
        }

        let event = self.rx.recv().await?;
        self.outstanding = Some(event.clone());
        Some(event)
    }

    /// Receives the next event without waiting, or `None` if the bus is idle.
    pub fn try_recv(&mut self) -> Option<FleetEvent> {
        if let Some(event) = &self.outstanding {
            return Some(event.clone());
        }

        let event = self.rx.try_recv().ok()?;
        self.outstanding = Some(event.clone());
        Some(event)
    }

    /// Acknowledges the outstanding delivery, allowing the subscription to
    /// advance. Acknowledging an already-acknowledged sequence is a no-op
    /// (duplicate acks are expected under at-least-once delivery).
    pub fn ack(&mut self, seq: EventSeq) -> Result<(), EventError> {
        match &self.outstanding {
            Some(event) if event.seq == seq => {
                self.outstanding = None;
                Ok(())
            }
            Some(event) => Err(EventError::AckMismatch {
                expected: event.seq,
                actual: seq,
            }),
            None => Ok(()),
        }
    }
}
