//! Compute provider interface and mock implementation.
//!
//! The provider interface abstracts the external compute API:
//! - SKU inventory and pricing queries
//! - Launch and (idempotent) terminate commands
//! - The raw interruption/health event feed
//!
//! A mock implementation is provided for testing and development.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flotilla_events::InterruptionKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::{CapacitySku, CapacityType};

/// Errors from provider commands, split by how the caller should react.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    /// Rate limiting or a momentary capacity shortfall; retried with backoff.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Missing authorization; fatal to the claim, surfaced prominently.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The requested SKU does not exist or is malformed; fatal to the claim.
    #[error("invalid SKU reference: {0}")]
    InvalidSku(String),

    /// The referenced instance is unknown.
    #[error("instance not found: {0}")]
    NotFound(String),
}

impl ProviderError {
    /// Returns true if the operation should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Ownership tag keys stamped onto every launched instance.
///
/// The controller may only terminate instances carrying both the cluster tag
/// and the pool tag; everything else is externally-managed capacity.
pub mod tags {
    pub const CLUSTER: &str = "flotilla/cluster";
    pub const POOL: &str = "flotilla/pool";
    pub const CLAIM: &str = "flotilla/claim";
}

/// A launch command: SKU + count + tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub sku_id: String,
    pub capacity_type: CapacityType,
    pub zone: String,
    pub count: u32,
    pub tags: BTreeMap<String, String>,
}

/// Handle to a launched instance, returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub instance_id: String,
    pub sku_id: String,
    pub capacity_type: CapacityType,
    pub zone: String,
    pub launched_at: DateTime<Utc>,
}

/// A raw interruption signal from the provider feed, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInterruption {
    pub instance_id: String,
    pub kind: InterruptionKind,
    pub deadline: DateTime<Utc>,
}

/// Compute provider interface.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Query the SKU inventory with current pricing and availability.
    async fn describe_skus(&self) -> Result<Vec<CapacitySku>, ProviderError>;

    /// Launch `count` instances of a SKU. Either all instances launch or the
    /// command fails without side effects.
    async fn launch(&self, request: &LaunchRequest) -> Result<Vec<InstanceHandle>, ProviderError>;

    /// Terminate an instance. Idempotent: terminating an already-terminated
    /// or unknown instance succeeds without side effects.
    async fn terminate(&self, instance_id: &str) -> Result<(), ProviderError>;

    /// Drain pending interruption signals, in arrival order.
    async fn poll_interruptions(&self) -> Result<Vec<RawInterruption>, ProviderError>;
}

// =============================================================================
// Mock provider
// =============================================================================

#[derive(Default)]
struct MockState {
    skus: Vec<CapacitySku>,
    launched: Vec<LaunchRequest>,
    live_instances: HashSet<String>,
    terminate_calls: Vec<String>,
    pending_interruptions: VecDeque<RawInterruption>,
    launch_faults: VecDeque<ProviderError>,
    describe_faults: VecDeque<ProviderError>,
}

/// Mock provider for testing and development.
///
/// Inventory, faults, and interruption signals are all scriptable; launch
/// and terminate commands are journaled for assertions.
pub struct MockProvider {
    state: Mutex<MockState>,
    instance_counter: AtomicU64,
}

impl MockProvider {
    pub fn new(skus: Vec<CapacitySku>) -> Self {
        Self {
            state: Mutex::new(MockState {
                skus,
                ..Default::default()
            }),
            instance_counter: AtomicU64::new(0),
        }
    }

    /// Replace the SKU inventory served by `describe_skus`.
    pub fn set_skus(&self, skus: Vec<CapacitySku>) {
        self.state.lock().unwrap().skus = skus;
    }

    /// Queue an error for the next launch call.
    pub fn fail_next_launch(&self, error: ProviderError) {
        self.state.lock().unwrap().launch_faults.push_back(error);
    }

    /// Queue an error for the next describe call.
    pub fn fail_next_describe(&self, error: ProviderError) {
        self.state.lock().unwrap().describe_faults.push_back(error);
    }

    /// Queue an interruption signal for the next poll.
    pub fn inject_interruption(&self, raw: RawInterruption) {
        self.state
            .lock()
            .unwrap()
            .pending_interruptions
            .push_back(raw);
    }

    /// All launch requests issued so far.
    pub fn launch_journal(&self) -> Vec<LaunchRequest> {
        self.state.lock().unwrap().launched.clone()
    }

    /// All terminate calls issued so far (including idempotent repeats).
    pub fn terminate_journal(&self) -> Vec<String> {
        self.state.lock().unwrap().terminate_calls.clone()
    }

    /// Returns true if the instance is currently live.
    pub fn is_live(&self, instance_id: &str) -> bool {
        self.state.lock().unwrap().live_instances.contains(instance_id)
    }

    fn next_instance_id(&self) -> String {
        let n = self.instance_counter.fetch_add(1, Ordering::SeqCst);
        format!("i-{:012x}", n)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    async fn describe_skus(&self) -> Result<Vec<CapacitySku>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.describe_faults.pop_front() {
            return Err(err);
        }
        Ok(state.skus.clone())
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<Vec<InstanceHandle>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.launch_faults.pop_front() {
            debug!(sku_id = %request.sku_id, error = %err, "[MOCK] Launch failing by injection");
            return Err(err);
        }
        if !state.skus.iter().any(|s| s.sku_id == request.sku_id) {
            return Err(ProviderError::InvalidSku(request.sku_id.clone()));
        }

        state.launched.push(request.clone());

        let mut handles = Vec::with_capacity(request.count as usize);
        for _ in 0..request.count {
            let instance_id = self.next_instance_id();
            state.live_instances.insert(instance_id.clone());
            handles.push(InstanceHandle {
                instance_id,
                sku_id: request.sku_id.clone(),
                capacity_type: request.capacity_type,
                zone: request.zone.clone(),
                launched_at: Utc::now(),
            });
        }

        info!(
            sku_id = %request.sku_id,
            capacity_type = %request.capacity_type,
            count = request.count,
            "[MOCK] Launched instances"
        );
        Ok(handles)
    }

    async fn terminate(&self, instance_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.terminate_calls.push(instance_id.to_string());
        let was_live = state.live_instances.remove(instance_id);
        debug!(instance_id, was_live, "[MOCK] Terminate");
        // Idempotent: unknown or already-terminated instances are fine.
        Ok(())
    }

    async fn poll_interruptions(&self) -> Result<Vec<RawInterruption>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        Ok(state.pending_interruptions.drain(..).collect())
    }
}
