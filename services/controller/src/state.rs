//! Application state shared across request handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::catalog::CatalogHandle;
use crate::pool::PoolSet;
use crate::registry::FleetRegistry;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cluster: String,
    pools: Arc<PoolSet>,
    registry: Arc<FleetRegistry>,
    catalog: CatalogHandle,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        cluster: String,
        pools: Arc<PoolSet>,
        registry: Arc<FleetRegistry>,
        catalog: CatalogHandle,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                cluster,
                pools,
                registry,
                catalog,
                started_at: Utc::now(),
            }),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.inner.cluster
    }

    pub fn pools(&self) -> &PoolSet {
        &self.inner.pools
    }

    pub fn registry(&self) -> &FleetRegistry {
        &self.inner.registry
    }

    pub fn catalog(&self) -> &CatalogHandle {
        &self.inner.catalog
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }
}
