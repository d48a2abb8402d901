//! Per-pool disruption accounting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use flotilla_id::PoolId;
use tracing::debug;

type Counts = Arc<Mutex<HashMap<PoolId, u32>>>;

/// Tracks how many nodes per pool are currently being disrupted.
///
/// Consolidation must stay under the pool's `max_concurrent` ceiling;
/// interruption-driven disruptions are counted but never blocked, since
/// the provider is taking the capacity either way.
#[derive(Clone, Default)]
pub struct DisruptionLedger {
    counts: Counts,
}

/// An active disruption slot. Released on drop.
pub struct DisruptionPermit {
    counts: Counts,
    pool_id: PoolId,
}

impl DisruptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a slot if the pool is below its ceiling.
    pub fn try_acquire(&self, pool_id: PoolId, ceiling: u32) -> Option<DisruptionPermit> {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(pool_id).or_insert(0);
        if *count >= ceiling {
            debug!(pool_id = %pool_id, active = *count, ceiling, "Disruption budget exhausted");
            return None;
        }
        *count += 1;
        Some(DisruptionPermit {
            counts: Arc::clone(&self.counts),
            pool_id,
        })
    }

    /// Take a slot regardless of the ceiling (interruption response).
    pub fn acquire_forced(&self, pool_id: PoolId) -> DisruptionPermit {
        let mut counts = self.counts.lock().unwrap();
        *counts.entry(pool_id).or_insert(0) += 1;
        DisruptionPermit {
            counts: Arc::clone(&self.counts),
            pool_id,
        }
    }

    /// Active disruptions for a pool.
    pub fn active(&self, pool_id: PoolId) -> u32 {
        self.counts
            .lock()
            .unwrap()
            .get(&pool_id)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for DisruptionPermit {
    fn drop(&mut self) {
        let mut counts = self.counts.lock().unwrap();
        if let Some(count) = counts.get_mut(&self.pool_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&self.pool_id);
            }
        }
    }
}
