//! # Web API Module
//!
//! Axum-based REST API over the orchestration coordinator.
//!
//! ## Overview
//!
//! The API is a thin adapter: handlers parse requests, call one coordinator
//! method, and render its receipt or error. Tenancy for collection
//! endpoints comes from the `X-Tenant-Id`/`X-Scope-Id` headers via the
//! [`extractors::TenantContext`] extractor; flow-id endpoints carry their
//! own tenancy in the record.
//!
//! ## Core Components
//!
//! - [`routes`] - route table, `/v1` flow API plus `/health` probes
//! - [`handlers`] - request handlers and their DTOs
//! - [`errors`] - `ApiError` with HTTP status mappings
//! - [`state`] - shared [`AppState`](state::AppState)

pub mod errors;
pub mod extractors;
pub mod handlers;
pub mod routes;
pub mod state;

use crate::config::WebConfig;
use axum::Router;
use state::AppState;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Build the Axum application with all routes and middleware.
pub fn create_app(state: AppState, config: &WebConfig) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .nest("/v1", routes::api_v1_routes())
        .layer(RequestBodyLimitLayer::new(config.request_body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
