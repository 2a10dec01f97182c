//! # Master Flow Record
//!
//! The lifecycle anchor for a workflow instance, independent of workflow type.
//!
//! ## Overview
//!
//! One `MasterFlowRecord` exists per workflow instance and is the single
//! source of truth for "is this flow currently running". The record carries an
//! optimistic-lock `version` counter: every lifecycle write goes through a
//! compare-and-swap on that counter, so two callers racing pause/cancel/resume
//! against the same flow cannot both win.
//!
//! ## Database Schema
//!
//! Maps to `migflow_master_flows`:
//! - `id`: Primary key (UUID)
//! - `tenant_id` / `scope_id`: tenancy tuple used by the concurrency guard
//! - `workflow_type`: closed enum, stored as TEXT
//! - `lifecycle_status`: TEXT, partial-unique-indexed on active values
//! - `status_reason`: failure/cancellation cause (`stuck_no_executor`, ...)
//! - `version`: BIGINT optimistic-lock counter
//!
//! The uniqueness invariant (at most one record with an active status per
//! `(tenant_id, scope_id, workflow_type)`) is enforced by the store inside
//! the creating transaction, never by a separate read-then-write.

use crate::state_machine::states::LifecycleStatus;
use crate::workflow::{PhaseName, WorkflowType};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle-owning record for one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterFlowRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub scope_id: String,
    pub workflow_type: WorkflowType,
    pub lifecycle_status: LifecycleStatus,
    /// Populated on failure or cancellation (`timeout`, `stuck_no_executor`,
    /// `persistence_error`, ...); cleared on resume.
    pub status_reason: Option<String>,
    /// Optimistic-lock counter, bumped on every lifecycle write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MasterFlowRecord {
    /// Whether this flow still occupies the active slot for its tenant scope.
    pub fn is_active(&self) -> bool {
        self.lifecycle_status.is_active()
    }
}

/// A flow flagged by the health monitor scan: lifecycle still active but not
/// touched within the staleness window. Derived by the scan query, never
/// stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StuckFlowCandidate {
    pub master: MasterFlowRecord,
    pub current_phase: PhaseName,
    /// Seconds since `updated_at`, measured against the store's clock so
    /// monitor and runner never compare timestamps across hosts.
    pub stale_for_secs: i64,
}

impl StuckFlowCandidate {
    pub fn stale_for(&self) -> Duration {
        Duration::seconds(self.stale_for_secs)
    }
}

/// Creation payload for a master flow (generated fields filled by the store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMasterFlow {
    pub tenant_id: String,
    pub scope_id: String,
    pub workflow_type: WorkflowType,
}

impl NewMasterFlow {
    pub fn new(
        tenant_id: impl Into<String>,
        scope_id: impl Into<String>,
        workflow_type: WorkflowType,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            scope_id: scope_id.into(),
            workflow_type,
        }
    }
}
