//! Error types for the flow orchestration engine.
//!
//! One taxonomy crosses the coordinator, runner, and monitor so callers can
//! branch on what went wrong rather than parse strings. The web layer maps
//! these onto HTTP statuses in `web::errors`; the store layer has its own
//! `StoreError` that converts upward through `From`.

use crate::state_machine::{LifecycleStatus, TransitionError};
use crate::store::StoreError;
use crate::workflow::{PhaseName, WorkflowType};
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by orchestration operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestrationError {
    /// An active flow already holds the (tenant, scope, type) slot. Carries
    /// the existing flow so callers can offer "resume existing" instead.
    #[error(
        "an active {workflow_type} flow already exists for tenant '{tenant_id}' scope '{scope_id}': {existing_flow_id} ({existing_status})"
    )]
    Conflict {
        tenant_id: String,
        scope_id: String,
        workflow_type: WorkflowType,
        existing_flow_id: Uuid,
        existing_status: LifecycleStatus,
        existing_phase: Option<PhaseName>,
    },

    /// The flow is being executed by a live runner and the operation needs
    /// it stopped first (delete without force, duplicate start).
    #[error("flow {master_flow_id} is currently executing")]
    FlowExecuting { master_flow_id: Uuid },

    /// The flow's lifecycle status does not admit the requested operation.
    #[error(
        "flow {master_flow_id} is {current_status}, cannot {requested}"
    )]
    InvalidState {
        master_flow_id: Uuid,
        current_status: LifecycleStatus,
        requested: String,
    },

    #[error("flow {master_flow_id} not found")]
    NotFound { master_flow_id: Uuid },

    /// A phase handler returned an error or was missing from the registry.
    #[error("phase '{phase}' failed for flow {master_flow_id}: {detail}")]
    PhaseHandler {
        master_flow_id: Uuid,
        phase: PhaseName,
        detail: String,
    },

    /// Storage operation failed after any applicable retries.
    #[error("persistence failure during {operation}: {reason}")]
    Persistence { operation: String, reason: String },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("{operation} timed out after {waited_secs}s")]
    Timeout { operation: String, waited_secs: u64 },
}

impl OrchestrationError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn persistence(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Persistence {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(
        master_flow_id: Uuid,
        current_status: LifecycleStatus,
        requested: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            master_flow_id,
            current_status,
            requested: requested.into(),
        }
    }

    /// Whether retrying the same call unchanged could succeed. Conflicts and
    /// state errors need a different request; persistence and timeouts may
    /// clear on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Persistence { .. } | Self::Timeout { .. }
        )
    }
}

impl From<StoreError> for OrchestrationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::DuplicateActiveFlow {
                tenant_id,
                scope_id,
                workflow_type,
                existing_flow_id,
                existing_status,
                existing_phase,
            } => Self::Conflict {
                tenant_id,
                scope_id,
                workflow_type,
                existing_flow_id,
                existing_status,
                existing_phase,
            },
            StoreError::MasterNotFound { master_flow_id } => Self::NotFound { master_flow_id },
            StoreError::ChildNotFound { master_flow_id } => Self::Persistence {
                operation: "load_child_flow".to_string(),
                reason: format!("no child record for master flow {master_flow_id}"),
            },
            StoreError::VersionConflict {
                master_flow_id,
                expected,
                actual,
            } => Self::Persistence {
                operation: "update_lifecycle".to_string(),
                reason: format!(
                    "version conflict on flow {master_flow_id}: expected {expected}, found {actual}"
                ),
            },
            StoreError::OrphanCheckFailed {
                master_flow_id,
                table,
                remaining,
            } => Self::Persistence {
                operation: "delete_flow".to_string(),
                reason: format!(
                    "orphan check failed for flow {master_flow_id}: {remaining} rows left in {table}"
                ),
            },
            StoreError::Database { operation, reason } => Self::Persistence { operation, reason },
            StoreError::Serialization { context, reason } => Self::Persistence {
                operation: context,
                reason,
            },
        }
    }
}

impl From<TransitionError> for OrchestrationError {
    fn from(error: TransitionError) -> Self {
        match &error {
            TransitionError::UnknownPhase { phase, .. } => Self::Validation {
                field: "target_phase".to_string(),
                reason: format!("phase '{phase}' is not part of this workflow"),
            },
            TransitionError::ForwardRewind { current, target } => Self::Validation {
                field: "target_phase".to_string(),
                reason: format!(
                    "cannot skip forward from '{current}' to '{target}'; resume targets must be completed phases"
                ),
            },
        }
    }
}

impl From<serde_json::Error> for OrchestrationError {
    fn from(error: serde_json::Error) -> Self {
        Self::Persistence {
            operation: "serialize".to_string(),
            reason: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;
