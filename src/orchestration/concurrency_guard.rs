//! # Concurrency Guard
//!
//! Enforces the one-active-flow rule: at most one flow with a non-terminal
//! status per `(tenant_id, scope_id, workflow_type)`.
//!
//! ## Overview
//!
//! This check runs before flow creation to produce a friendly conflict body
//! carrying the existing flow's id and phase, so callers can offer "resume
//! the existing flow" instead of a bare rejection. It is advisory only: the
//! authoritative guard is the partial unique index the store's creating
//! transaction targets, which closes the read-then-write race this pre-check
//! cannot.

use crate::error::Result;
use crate::state_machine::LifecycleStatus;
use crate::store::FlowRecordStore;
use crate::workflow::{PhaseName, WorkflowType};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Granted,
    /// An active flow already occupies the slot.
    Denied {
        existing_flow_id: Uuid,
        existing_status: LifecycleStatus,
        existing_phase: Option<PhaseName>,
    },
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Advisory pre-check for the active-flow uniqueness constraint.
pub struct ConcurrencyGuard {
    store: Arc<dyn FlowRecordStore>,
}

impl ConcurrencyGuard {
    pub fn new(store: Arc<dyn FlowRecordStore>) -> Self {
        Self { store }
    }

    /// Check whether a new flow may be created for the slot.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, workflow_type = %workflow_type))]
    pub async fn try_acquire(
        &self,
        tenant_id: &str,
        scope_id: &str,
        workflow_type: WorkflowType,
    ) -> Result<Admission> {
        let existing = self
            .store
            .find_active(tenant_id, scope_id, workflow_type)
            .await?;
        match existing {
            None => Ok(Admission::Granted),
            Some(master) => {
                let existing_phase = self
                    .store
                    .get_child(master.id)
                    .await
                    .ok()
                    .map(|child| child.current_phase);
                Ok(Admission::Denied {
                    existing_flow_id: master.id,
                    existing_status: master.lifecycle_status,
                    existing_phase,
                })
            }
        }
    }
}
