//! Health check endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status: "ok" or "degraded".
    pub status: String,

    /// Service name.
    pub service: String,

    /// Service version.
    pub version: String,

    /// Cluster this controller manages.
    pub cluster: String,

    /// Current timestamp (ISO 8601).
    pub timestamp: String,

    /// True when the catalog snapshot is last-known-good rather than fresh.
    pub catalog_stale: bool,
}

/// Create health check routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

/// Liveness: the process is up and serving.
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let catalog = state.catalog().load();
    let status = if catalog.stale { "degraded" } else { "ok" };

    Json(HealthResponse {
        status: status.to_string(),
        service: "flotilla-controller".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cluster: state.cluster().to_string(),
        timestamp: Utc::now().to_rfc3339(),
        catalog_stale: catalog.stale,
    })
}

/// Readiness: pools are loaded and at least one catalog refresh succeeded.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let catalog = state.catalog().load();
    if state.pools().is_empty() || catalog.stale {
        return (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response();
    }
    (StatusCode::OK, "ready").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::catalog::{Catalog, CatalogHandle};
    use crate::pool::PoolSet;
    use crate::registry::FleetRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state(stale: bool) -> AppState {
        let catalog = CatalogHandle::default();
        catalog.store(Catalog {
            skus: Vec::new(),
            refreshed_at: Utc::now(),
            stale,
        });
        AppState::new(
            "test-cluster".to_string(),
            Arc::new(PoolSet::parse("[[pool]]\nname = \"general\"\n").unwrap()),
            Arc::new(FleetRegistry::new()),
            catalog,
        )
    }

    #[tokio::test]
    async fn test_healthz_reports_catalog_staleness() {
        let app = create_router(state(false));
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.cluster, "test-cluster");
        assert!(!health.catalog_stale);
    }

    #[tokio::test]
    async fn test_readyz_unready_when_catalog_stale() {
        let app = create_router(state(true));
        let response = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_readyz_ready_with_fresh_catalog() {
        let app = create_router(state(false));
        let response = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
