//! Pool status endpoints.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::api::error::ApiError;
use crate::catalog::CapacityType;
use crate::pool::{DisruptionBudget, NodePool, PoolRequirements};
use crate::resources::ResourceVector;
use crate::state::AppState;
use crate::workload::Taint;

/// Create pool routes: /v1/pools
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_pools))
        .route("/{name}", get(get_pool))
}

/// Response for a single pool.
#[derive(Debug, Serialize)]
pub struct PoolResponse {
    pub pool_id: String,
    pub name: String,
    pub requirements: PoolRequirements,
    pub capacity_type_order: Vec<CapacityType>,
    pub limits: ResourceVector,
    pub disruption: DisruptionBudget,
    pub labels: std::collections::BTreeMap<String, String>,
    pub taints: Vec<Taint>,
    pub registration_timeout_secs: u64,

    /// Hash of the pool definition, for correlating decisions to config.
    pub spec_hash: String,
}

impl From<&NodePool> for PoolResponse {
    fn from(pool: &NodePool) -> Self {
        Self {
            pool_id: pool.pool_id.to_string(),
            name: pool.name.clone(),
            requirements: pool.requirements.clone(),
            capacity_type_order: pool.capacity_type_order.clone(),
            limits: pool.limits.clone(),
            disruption: pool.disruption.clone(),
            labels: pool.labels.clone(),
            taints: pool.taints.clone(),
            registration_timeout_secs: pool.registration_timeout.as_secs(),
            spec_hash: pool.spec_hash.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListPoolsResponse {
    pub pools: Vec<PoolResponse>,
}

async fn list_pools(State(state): State<AppState>) -> Json<ListPoolsResponse> {
    let pools = state.pools().iter().map(PoolResponse::from).collect();
    Json(ListPoolsResponse { pools })
}

async fn get_pool(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PoolResponse>, ApiError> {
    state
        .pools()
        .by_name(&name)
        .map(|pool| Json(PoolResponse::from(pool)))
        .ok_or_else(|| ApiError::NotFound(format!("pool '{name}' not found")))
}
