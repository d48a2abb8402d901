//! Capacity catalog: the queryable inventory of provider SKUs.
//!
//! The catalog is refreshed on a timer from the provider API. Each refresh
//! builds a complete new snapshot and swaps it in atomically, so readers
//! never observe a partially-updated catalog. A failed refresh keeps serving
//! the last-known-good snapshot with a staleness flag rather than blocking
//! provisioning.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use flotilla_reconcile::{RetryTracker, DEFAULT_MAX_RETRIES};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::pool::NodePool;
use crate::provider::CloudProvider;
use crate::resources::ResourceVector;

/// Capacity type of an offering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityType {
    Spot,
    OnDemand,
}

impl std::fmt::Display for CapacityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapacityType::Spot => write!(f, "spot"),
            CapacityType::OnDemand => write!(f, "on_demand"),
        }
    }
}

/// Classification labels on a SKU, used for constraint matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuLabels {
    pub family: String,
    pub size: String,
    pub category: String,
}

impl SkuLabels {
    /// Flattens the classification into the label map nodes will carry.
    pub fn as_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("sku.family".to_string(), self.family.clone());
        map.insert("sku.size".to_string(), self.size.clone());
        map.insert("sku.category".to_string(), self.category.clone());
        map
    }
}

/// Price and availability of one capacity type for a SKU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offering {
    /// Current price in USD per hour; used only for ordering candidates.
    pub price_per_hour: f64,

    /// Whether the provider currently offers this capacity type.
    pub available: bool,
}

/// A provider-offered instance shape. Never mutated mid-use, only superseded
/// by the next catalog snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacitySku {
    /// Provider identifier, e.g. "m5.large".
    pub sku_id: String,

    /// Availability zone this shape is offered in.
    pub zone: String,

    /// Allocatable resource capacity.
    pub capacity: ResourceVector,

    pub labels: SkuLabels,

    /// Offerings by capacity type.
    pub offerings: BTreeMap<CapacityType, Offering>,
}

impl CapacitySku {
    /// Returns the first capacity type in `order` with an available offering,
    /// together with its price.
    pub fn best_offering(&self, order: &[CapacityType]) -> Option<(CapacityType, f64)> {
        order.iter().find_map(|ct| {
            self.offerings
                .get(ct)
                .filter(|o| o.available)
                .map(|o| (*ct, o.price_per_hour))
        })
    }

    /// Current price for a specific capacity type, if offered.
    pub fn price(&self, capacity_type: CapacityType) -> Option<f64> {
        self.offerings
            .get(&capacity_type)
            .filter(|o| o.available)
            .map(|o| o.price_per_hour)
    }
}

/// An immutable catalog snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub skus: Vec<CapacitySku>,
    pub refreshed_at: DateTime<Utc>,

    /// True when the last refresh attempt failed and this snapshot is
    /// last-known-good.
    pub stale: bool,
}

impl Catalog {
    /// An empty, stale catalog for startup before the first refresh.
    pub fn empty() -> Self {
        Self {
            skus: Vec::new(),
            refreshed_at: Utc::now(),
            stale: true,
        }
    }

    /// SKUs admissible for a pool by its category/family/size/zone
    /// requirements.
    ///
    /// Offering availability is deliberately not filtered here: the fit
    /// simulator needs to see requirement-matching SKUs with no offered
    /// capacity to report that case distinctly.
    pub fn candidates_for(&self, pool: &NodePool) -> Vec<CapacitySku> {
        let req = &pool.requirements;
        self.skus
            .iter()
            .filter(|sku| {
                (req.categories.is_empty() || req.categories.contains(&sku.labels.category))
                    && (req.families.is_empty() || req.families.contains(&sku.labels.family))
                    && (req.sizes.is_empty() || req.sizes.contains(&sku.labels.size))
                    && (req.zones.is_empty() || req.zones.contains(&sku.zone))
            })
            .cloned()
            .collect()
    }
}

/// Shared handle to the current catalog snapshot.
///
/// Writers replace the whole `Arc`; readers clone it and drop the lock
/// immediately, so no reader ever holds the lock across an await point.
#[derive(Clone)]
pub struct CatalogHandle {
    inner: Arc<RwLock<Arc<Catalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    /// Returns the current snapshot.
    pub fn load(&self) -> Arc<Catalog> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Atomically replaces the snapshot.
    pub fn store(&self, catalog: Catalog) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(catalog);
    }

    /// Marks the current snapshot stale without losing its contents.
    pub fn mark_stale(&self) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut catalog = (**guard).clone();
        catalog.stale = true;
        *guard = Arc::new(catalog);
    }
}

impl Default for CatalogHandle {
    fn default() -> Self {
        Self::new(Catalog::empty())
    }
}

/// Background loop refreshing the catalog from the provider.
pub struct CatalogRefresher {
    provider: Arc<dyn CloudProvider>,
    handle: CatalogHandle,
    interval: Duration,
}

impl CatalogRefresher {
    pub fn new(provider: Arc<dyn CloudProvider>, handle: CatalogHandle, interval: Duration) -> Self {
        Self {
            provider,
            handle,
            interval,
        }
    }

    /// Run the refresh loop until shutdown is signaled.
    ///
    /// The first refresh happens immediately so the reconcilers do not start
    /// against an empty catalog.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting catalog refresh loop"
        );

        let mut interval = tokio::time::interval(self.interval);

        // Escalate to error-level logging once refreshes keep failing; a
        // single failure only staleness-flags the snapshot.
        let mut failures = RetryTracker::new(DEFAULT_MAX_RETRIES, self.interval * 10);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.refresh_once().await {
                        failures.clear("catalog");
                    } else if failures.record_failure("catalog") {
                        error!("Catalog refresh failing persistently");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Catalog refresher shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Perform a single refresh attempt. Returns true on success.
    pub async fn refresh_once(&self) -> bool {
        match self.provider.describe_skus().await {
            Ok(skus) => {
                debug!(sku_count = skus.len(), "Catalog refreshed");
                self.handle.store(Catalog {
                    skus,
                    refreshed_at: Utc::now(),
                    stale: false,
                });
                true
            }
            Err(e) => {
                warn!(error = %e, "Catalog refresh failed, serving last-known-good");
                self.handle.mark_stale();
                false
            }
        }
    }
}
