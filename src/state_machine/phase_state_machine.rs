//! # Phase State Machine
//!
//! Pure transition logic for advancing a flow through its phase definition.
//!
//! ## Overview
//!
//! `PhaseStateMachine` owns a `PhaseDefinition` and computes the next
//! progress snapshot for an event without touching storage. Callers persist
//! the returned `TransitionOutcome` themselves, which keeps every ordering
//! rule testable without a database:
//!
//! - phases advance strictly in definition order, never skipping forward
//! - a failed phase reports whether it is retryable
//! - rewinds target the current phase or an earlier one, never a later one
//!
//! The background runner applies `PhaseSucceeded`/`PhaseFailed` after each
//! handler invocation; the coordinator applies pause/resume/cancel events
//! and uses `rewind` when a resume request asks to restart from an earlier
//! phase.

use crate::models::PhaseProgress;
use crate::state_machine::events::FlowEvent;
use crate::workflow::{PhaseDefinition, PhaseName, WorkflowType};
use chrono::Utc;
use thiserror::Error;

/// What the flow should do after a transition is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDisposition {
    /// More phases remain; keep executing.
    Continue,
    /// The final phase completed; the flow is done.
    Completed,
    /// The current phase failed; `retryable` reflects its definition.
    Failed { retryable: bool },
    /// Execution stops at the phase boundary; state is resumable.
    Paused,
    /// Execution stops permanently.
    Cancelled,
}

/// Result of applying one event: the next progress snapshot, the next
/// cursor position, and what the caller should do with the flow.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub progress: PhaseProgress,
    pub current_phase: PhaseName,
    pub disposition: FlowDisposition,
}

/// Transition rejections. These indicate caller bugs or invalid client
/// requests, never transient conditions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("phase '{phase}' is not part of the {workflow_type} definition")]
    UnknownPhase {
        workflow_type: WorkflowType,
        phase: PhaseName,
    },

    #[error("cannot rewind forward from '{current}' to '{target}'")]
    ForwardRewind {
        current: PhaseName,
        target: PhaseName,
    },
}

/// Pure state machine over one workflow type's phase definition.
#[derive(Debug, Clone)]
pub struct PhaseStateMachine {
    definition: PhaseDefinition,
}

impl PhaseStateMachine {
    pub fn new(definition: PhaseDefinition) -> Self {
        Self { definition }
    }

    pub fn for_workflow(workflow_type: WorkflowType) -> Self {
        Self::new(PhaseDefinition::for_workflow(workflow_type))
    }

    pub fn definition(&self) -> &PhaseDefinition {
        &self.definition
    }

    /// Apply one event to the given progress snapshot.
    ///
    /// The input snapshot is never mutated; the outcome carries the updated
    /// copy for the caller to persist.
    pub fn apply(
        &self,
        progress: &PhaseProgress,
        current: PhaseName,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, TransitionError> {
        if !self.definition.contains(current) {
            return Err(TransitionError::UnknownPhase {
                workflow_type: self.definition.workflow_type(),
                phase: current,
            });
        }

        let mut next = progress.clone();
        match event {
            FlowEvent::PhaseSucceeded => {
                next.mark_completed(current, Utc::now());
                match self.definition.next_after(current) {
                    Some(next_phase) => Ok(TransitionOutcome {
                        progress: next,
                        current_phase: next_phase,
                        disposition: FlowDisposition::Continue,
                    }),
                    None => Ok(TransitionOutcome {
                        progress: next,
                        current_phase: current,
                        disposition: FlowDisposition::Completed,
                    }),
                }
            }
            FlowEvent::PhaseFailed(error) => {
                next.mark_failed(current, error.clone());
                Ok(TransitionOutcome {
                    progress: next,
                    current_phase: current,
                    disposition: FlowDisposition::Failed {
                        retryable: self.definition.is_retryable(current),
                    },
                })
            }
            FlowEvent::FlowPaused => Ok(TransitionOutcome {
                progress: next,
                current_phase: current,
                disposition: FlowDisposition::Paused,
            }),
            FlowEvent::FlowResumed => Ok(TransitionOutcome {
                progress: next,
                current_phase: current,
                disposition: FlowDisposition::Continue,
            }),
            FlowEvent::FlowCancelled => Ok(TransitionOutcome {
                progress: next,
                current_phase: current,
                disposition: FlowDisposition::Cancelled,
            }),
        }
    }

    /// Move the cursor to `target`, which must be the current phase or an
    /// earlier one. The target and every later entry reset to pending so the
    /// runner re-executes them.
    pub fn rewind(
        &self,
        progress: &PhaseProgress,
        current: PhaseName,
        target: PhaseName,
    ) -> Result<TransitionOutcome, TransitionError> {
        let current_idx = self.definition.index_of(current).ok_or({
            TransitionError::UnknownPhase {
                workflow_type: self.definition.workflow_type(),
                phase: current,
            }
        })?;
        let target_idx =
            self.definition
                .index_of(target)
                .ok_or(TransitionError::UnknownPhase {
                    workflow_type: self.definition.workflow_type(),
                    phase: target,
                })?;
        if target_idx > current_idx {
            return Err(TransitionError::ForwardRewind { current, target });
        }

        let mut next = progress.clone();
        next.reset_from(target);
        Ok(TransitionOutcome {
            progress: next,
            current_phase: target,
            disposition: FlowDisposition::Continue,
        })
    }
}
