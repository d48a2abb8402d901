//! Node inventory endpoints.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use flotilla_id::NodeId;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::registry::FleetNode;
use crate::state::AppState;

/// Create node routes: /v1/nodes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_nodes))
        .route("/{node_id}", get(get_node))
}

#[derive(Debug, Serialize)]
pub struct ListNodesResponse {
    pub nodes: Vec<FleetNode>,
}

async fn list_nodes(State(state): State<AppState>) -> Json<ListNodesResponse> {
    Json(ListNodesResponse {
        nodes: state.registry().list_nodes().await,
    })
}

async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<FleetNode>, ApiError> {
    let node_id: NodeId = node_id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid node id: {e}")))?;
    state
        .registry()
        .get_node(node_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("node {node_id} not found")))
}
