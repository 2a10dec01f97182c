//! # Web API Error Types
//!
//! HTTP-facing error enum and its status code mappings. Orchestration
//! errors convert through [`From`]; handlers mostly return `ApiResult` and
//! let `?` do the translation.

use crate::error::OrchestrationError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Web API errors with HTTP status code mappings.
///
/// Responses render as `{"error": {"code", "message", "details"?}}` so
/// clients can branch on the stable `code` without parsing messages.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("flow not found")]
    NotFound,

    /// Another active flow occupies the tenant slot.
    #[error("{message}")]
    DuplicateActiveFlow {
        message: String,
        details: serde_json::Value,
    },

    /// The flow is being executed right now and the operation needs it idle.
    #[error("{message}")]
    FlowExecuting { message: String },

    /// The flow's lifecycle state does not admit the requested transition.
    #[error("{message}")]
    InvalidState {
        message: String,
        details: serde_json::Value,
    },

    /// The request was understood but its content failed validation.
    #[error("{message}")]
    Validation { message: String },

    #[error("invalid request: {message}")]
    BadRequest { message: String },

    #[error("service temporarily unavailable")]
    ServiceUnavailable,

    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "flow not found".to_string(),
                None,
            ),
            ApiError::DuplicateActiveFlow { message, details } => (
                StatusCode::CONFLICT,
                "DUPLICATE_ACTIVE_FLOW",
                message,
                Some(details),
            ),
            ApiError::FlowExecuting { message } => {
                (StatusCode::CONFLICT, "FLOW_EXECUTING", message, None)
            }
            // A state that forbids the transition is a conflict with the
            // resource's current representation, not a malformed request.
            ApiError::InvalidState { message, details } => (
                StatusCode::CONFLICT,
                "INVALID_STATE",
                message,
                Some(details),
            ),
            ApiError::Validation { message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION",
                message,
                None,
            ),
            ApiError::BadRequest { message } => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", message, None)
            }
            ApiError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "service temporarily unavailable".to_string(),
                None,
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "internal server error".to_string(),
                None,
            ),
        };

        let mut body = json!({
            "error": {
                "code": code,
                "message": message,
            }
        });
        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(error: OrchestrationError) -> Self {
        match &error {
            OrchestrationError::NotFound { .. } => ApiError::NotFound,
            OrchestrationError::Conflict {
                existing_flow_id,
                existing_status,
                existing_phase,
                ..
            } => ApiError::DuplicateActiveFlow {
                message: error.to_string(),
                details: json!({
                    "existing_flow_id": existing_flow_id,
                    "existing_status": existing_status,
                    "existing_phase": existing_phase,
                }),
            },
            OrchestrationError::FlowExecuting { .. } => ApiError::FlowExecuting {
                message: error.to_string(),
            },
            OrchestrationError::InvalidState {
                current_status,
                requested,
                ..
            } => ApiError::InvalidState {
                message: error.to_string(),
                details: json!({
                    "current_status": current_status,
                    "requested": requested,
                }),
            },
            OrchestrationError::Validation { .. } => ApiError::Validation {
                message: error.to_string(),
            },
            OrchestrationError::Timeout { .. } => {
                error!(error = %error, "Operation timed out behind the API");
                ApiError::ServiceUnavailable
            }
            OrchestrationError::Persistence { .. }
            | OrchestrationError::PhaseHandler { .. }
            | OrchestrationError::Configuration { .. } => {
                // Detail goes to the log, never to the client.
                error!(error = %error, "Internal error behind the API");
                ApiError::Internal
            }
        }
    }
}

/// Result type alias for web handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::LifecycleStatus;
    use uuid::Uuid;

    #[test]
    fn test_orchestration_error_mapping() {
        let not_found = OrchestrationError::NotFound {
            master_flow_id: Uuid::new_v4(),
        };
        assert!(matches!(ApiError::from(not_found), ApiError::NotFound));

        let invalid = OrchestrationError::invalid_state(
            Uuid::new_v4(),
            LifecycleStatus::Completed,
            "pause",
        );
        match ApiError::from(invalid) {
            ApiError::InvalidState { details, .. } => {
                assert_eq!(details["current_status"], "completed");
                assert_eq!(details["requested"], "pause");
            }
            other => panic!("expected InvalidState, got {other:?}"),
        }

        let validation = OrchestrationError::validation("tenant_id", "must not be empty");
        assert!(matches!(
            ApiError::from(validation),
            ApiError::Validation { .. }
        ));
    }

    #[test]
    fn test_status_code_mapping() {
        // A transition refused by the flow's current state is a 409; the
        // request itself was fine.
        let invalid = ApiError::InvalidState {
            message: "flow is completed".to_string(),
            details: json!({}),
        };
        assert_eq!(invalid.into_response().status(), StatusCode::CONFLICT);

        // Semantically invalid input is a 422, distinct from the 400 used
        // for requests that cannot be read at all.
        let validation = ApiError::Validation {
            message: "resume targets must be completed phases".to_string(),
        };
        assert_eq!(
            validation.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );

        let unreadable = ApiError::bad_request("missing required header x-tenant-id");
        assert_eq!(unreadable.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
