//! # Web API Route Definitions
//!
//! Route table for the flow API, grouped by concern and versioned under
//! `/v1`. Health probes live unversioned at the root.

use crate::web::handlers;
use crate::web::state::AppState;
use axum::routing::{delete, get, post};
use axum::Router;

/// API v1 routes: flow lifecycle and inspection.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/flows/initialize", post(handlers::flows::create_flow))
        .route("/flows", get(handlers::flows::list_flows))
        .route("/flows/:id/status", get(handlers::flows::get_flow))
        .route("/flows/:id", delete(handlers::flows::delete_flow))
        .route(
            "/flows/:id/artifacts",
            get(handlers::flows::list_flow_artifacts),
        )
        .route("/flows/:id/pause", post(handlers::flows::pause_flow))
        .route("/flows/:id/resume", post(handlers::flows::resume_flow))
        .route("/flows/:id/cancel", post(handlers::flows::cancel_flow))
}

/// Health and probe routes:
/// - `/health` - basic health check
/// - `/health/live` - Kubernetes liveness probe
/// - `/health/ready` - Kubernetes readiness probe
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::basic_health))
        .route("/health/live", get(handlers::health::liveness_probe))
        .route("/health/ready", get(handlers::health::readiness_probe))
}
