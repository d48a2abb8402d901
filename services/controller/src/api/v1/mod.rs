//! API v1 routes.

mod catalog;
mod claims;
mod nodes;
mod pools;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/pools", pools::routes())
        .nest("/claims", claims::routes())
        .nest("/nodes", nodes::routes())
        .nest("/catalog", catalog::routes())
}
