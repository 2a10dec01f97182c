//! Phase handler contract: the seam between orchestration and business
//! logic. Handlers receive an immutable context snapshot and return a new
//! runtime state plus metric deltas and artifacts; they never touch the
//! store or the lifecycle directly.

use crate::models::{FlowMetrics, NewFlowArtifact};
use crate::workflow::{PhaseName, WorkflowType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use uuid::Uuid;

/// Failure raised by a phase handler. Whether the phase may be retried is
/// decided by the phase definition, not the handler.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct PhaseError {
    pub message: String,
}

impl PhaseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for PhaseError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(format!("state serialization failed: {error}"))
    }
}

/// Immutable snapshot handed to a handler for one phase invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseContext {
    pub master_flow_id: Uuid,
    pub tenant_id: String,
    pub scope_id: String,
    pub workflow_type: WorkflowType,
    pub phase: PhaseName,
    /// Opaque payload owned by the handlers of this workflow type. The
    /// orchestrator forwards it untouched between phases.
    pub runtime_state: serde_json::Value,
    pub selected_entity_ids: Vec<String>,
    /// Present only on the first invocation after a resume that supplied
    /// user input.
    pub resume_input: Option<serde_json::Value>,
}

/// What a successful phase invocation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    /// Replacement runtime state carried into the next phase.
    pub runtime_state: serde_json::Value,
    /// Counter deltas merged additively into the flow's metrics.
    pub metrics: FlowMetrics,
    /// Durable outputs persisted before the flow advances.
    pub artifacts: Vec<NewFlowArtifact>,
}

impl PhaseOutcome {
    /// Outcome carrying only a new runtime state.
    pub fn with_state(runtime_state: serde_json::Value) -> Self {
        Self {
            runtime_state,
            metrics: FlowMetrics::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn metric(mut self, key: impl Into<String>, delta: i64) -> Self {
        self.metrics.increment(key, delta);
        self
    }

    pub fn artifact(mut self, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        self.artifacts.push(NewFlowArtifact::new(kind, payload));
        self
    }
}

/// Business logic for one phase of one workflow type.
#[async_trait]
pub trait PhaseHandler: Send + Sync {
    async fn execute(&self, context: PhaseContext) -> Result<PhaseOutcome, PhaseError>;
}

/// Adapter turning an async closure into a [`PhaseHandler`], for tests and
/// lightweight registrations.
pub struct FnPhaseHandler<F> {
    f: F,
}

impl<F> FnPhaseHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> PhaseHandler for FnPhaseHandler<F>
where
    F: Fn(PhaseContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PhaseOutcome, PhaseError>> + Send,
{
    async fn execute(&self, context: PhaseContext) -> Result<PhaseOutcome, PhaseError> {
        (self.f)(context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_handler_executes_closure() {
        let handler = FnPhaseHandler::new(|context: PhaseContext| async move {
            Ok(PhaseOutcome::with_state(serde_json::json!({
                "echo": context.phase.as_str(),
            }))
            .metric("invocations", 1))
        });

        let context = PhaseContext {
            master_flow_id: Uuid::new_v4(),
            tenant_id: "acme".to_string(),
            scope_id: "prod".to_string(),
            workflow_type: WorkflowType::Discovery,
            phase: PhaseName::Planning,
            runtime_state: serde_json::json!({}),
            selected_entity_ids: vec![],
            resume_input: None,
        };

        let outcome = handler.execute(context).await.unwrap();
        assert_eq!(outcome.runtime_state["echo"], "planning");
        assert_eq!(outcome.metrics.get("invocations"), 1);
    }

    #[test]
    fn test_outcome_builder_accumulates() {
        let outcome = PhaseOutcome::with_state(serde_json::json!({"step": 2}))
            .metric("rows", 10)
            .metric("rows", 5)
            .artifact("scan_summary", serde_json::json!({"entities": 2}));
        assert_eq!(outcome.metrics.get("rows"), 15);
        assert_eq!(outcome.artifacts.len(), 1);
        assert_eq!(outcome.artifacts[0].kind, "scan_summary");
    }
}
