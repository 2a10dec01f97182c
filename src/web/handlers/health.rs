//! # Health Check Handlers
//!
//! Kubernetes-compatible liveness and readiness endpoints.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::web::errors::{ApiError, ApiResult};
use crate::web::state::AppState;

/// Basic health check response
#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: String,
}

/// Readiness response with per-subsystem checks
#[derive(Serialize)]
pub struct ReadinessResponse {
    status: String,
    timestamp: String,
    checks: HashMap<String, HealthCheck>,
    info: ServiceInfo,
}

#[derive(Serialize)]
pub struct HealthCheck {
    status: String,
    message: Option<String>,
    duration_ms: u64,
}

#[derive(Serialize)]
pub struct ServiceInfo {
    version: String,
    uptime_secs: i64,
    health_monitor_running: bool,
}

/// Basic health check: `GET /health`
pub async fn basic_health(State(_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Liveness probe: `GET /health/live`
///
/// The process is alive if it can answer at all; no dependencies checked.
pub async fn liveness_probe(State(_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "alive".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Readiness probe: `GET /health/ready`
///
/// Ready means the store answers a ping. The health monitor's state is
/// reported but does not gate readiness; it may be disabled on purpose.
pub async fn readiness_probe(State(state): State<AppState>) -> ApiResult<Json<ReadinessResponse>> {
    debug!("Performing readiness probe");
    let mut checks = HashMap::new();

    let started = std::time::Instant::now();
    let store_check = match state.store.ping().await {
        Ok(()) => HealthCheck {
            status: "healthy".to_string(),
            message: None,
            duration_ms: started.elapsed().as_millis() as u64,
        },
        Err(error) => HealthCheck {
            status: "unhealthy".to_string(),
            message: Some(error.to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
        },
    };
    let store_healthy = store_check.status == "healthy";
    checks.insert("store".to_string(), store_check);

    let monitor_running = state.monitor.is_running();
    checks.insert(
        "health_monitor".to_string(),
        HealthCheck {
            status: if monitor_running {
                "running".to_string()
            } else {
                "stopped".to_string()
            },
            message: None,
            duration_ms: 0,
        },
    );

    let response = ReadinessResponse {
        status: if store_healthy { "ready" } else { "not_ready" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks,
        info: ServiceInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: state.uptime_secs(),
            health_monitor_running: monitor_running,
        },
    };

    if store_healthy {
        Ok(Json(response))
    } else {
        Err(ApiError::ServiceUnavailable)
    }
}
