//! Claim status endpoints.
//!
//! Claims expose the full state machine history, including failed claims
//! still inside the garbage-collection grace window, so operators can see
//! why capacity did not arrive.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use flotilla_id::ClaimId;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::registry::NodeClaim;
use crate::state::AppState;

/// Create claim routes: /v1/claims
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_claims))
        .route("/{claim_id}", get(get_claim))
}

#[derive(Debug, Serialize)]
pub struct ListClaimsResponse {
    pub claims: Vec<NodeClaim>,
}

async fn list_claims(State(state): State<AppState>) -> Json<ListClaimsResponse> {
    Json(ListClaimsResponse {
        claims: state.registry().list_claims().await,
    })
}

async fn get_claim(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
) -> Result<Json<NodeClaim>, ApiError> {
    let claim_id: ClaimId = claim_id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid claim id: {e}")))?;
    state
        .registry()
        .get_claim(claim_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("claim {claim_id} not found")))
}
