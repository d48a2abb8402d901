//! Catalog snapshot endpoint.

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::CapacitySku;
use crate::state::AppState;

/// Create catalog routes: /v1/catalog
pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(get_catalog))
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub refreshed_at: DateTime<Utc>,
    pub stale: bool,
    pub sku_count: usize,
    pub skus: Vec<CapacitySku>,
}

async fn get_catalog(State(state): State<AppState>) -> Json<CatalogResponse> {
    let snapshot = state.catalog().load();
    Json(CatalogResponse {
        refreshed_at: snapshot.refreshed_at,
        stale: snapshot.stale,
        sku_count: snapshot.skus.len(),
        skus: snapshot.skus.clone(),
    })
}
