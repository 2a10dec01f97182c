//! # Flow Record Store
//!
//! Persistence boundary for master flows, child flows, artifacts, and
//! execution leases.
//!
//! ## Overview
//!
//! `FlowRecordStore` is the single trait the orchestration layer talks to.
//! Two implementations ship:
//!
//! - [`PgFlowRecordStore`]: PostgreSQL via sqlx, the production store. The
//!   active-flow uniqueness guard, lease expiry, and staleness ages are all
//!   evaluated on the database clock inside the store's own transactions.
//! - [`InMemoryFlowRecordStore`]: lock-protected maps with identical
//!   semantics, used by tests and embedded scenarios.
//!
//! Store methods return `StoreError`; orchestration converts upward to
//! `OrchestrationError`. Structured variants carry enough context for the
//! web layer to render useful conflict bodies without re-querying.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryFlowRecordStore;
pub use postgres::PgFlowRecordStore;

use crate::models::{
    ChildFlowRecord, ExecutionLease, FlowArtifact, MasterFlowRecord, NewChildFlow, NewFlowArtifact,
    NewMasterFlow, StuckFlowCandidate,
};
use crate::state_machine::LifecycleStatus;
use crate::workflow::{PhaseName, WorkflowType};
use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by store implementations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The guarded insert found a live flow occupying the tenant slot.
    #[error(
        "an active {workflow_type} flow already exists for tenant '{tenant_id}' scope '{scope_id}': {existing_flow_id}"
    )]
    DuplicateActiveFlow {
        tenant_id: String,
        scope_id: String,
        workflow_type: WorkflowType,
        existing_flow_id: Uuid,
        existing_status: LifecycleStatus,
        existing_phase: Option<PhaseName>,
    },

    #[error("master flow {master_flow_id} not found")]
    MasterNotFound { master_flow_id: Uuid },

    #[error("child flow for master {master_flow_id} not found")]
    ChildNotFound { master_flow_id: Uuid },

    /// A lifecycle compare-and-set lost to a concurrent writer.
    #[error("version conflict on flow {master_flow_id}: expected {expected}, found {actual}")]
    VersionConflict {
        master_flow_id: Uuid,
        expected: i64,
        actual: i64,
    },

    /// Post-delete verification found rows still referencing the flow. The
    /// deleting transaction rolls back when this is returned.
    #[error("orphan check failed for flow {master_flow_id}: {remaining} rows remain in {table}")]
    OrphanCheckFailed {
        master_flow_id: Uuid,
        table: String,
        remaining: i64,
    },

    #[error("database error during {operation}: {reason}")]
    Database { operation: String, reason: String },

    #[error("serialization error in {context}: {reason}")]
    Serialization { context: String, reason: String },
}

impl StoreError {
    pub fn database(operation: impl Into<String>, error: sqlx::Error) -> Self {
        Self::Database {
            operation: operation.into(),
            reason: error.to_string(),
        }
    }

    pub fn serialization(context: impl Into<String>, error: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            reason: error.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Record ids removed by a cascading delete, reported back to the caller.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeletedRecords {
    pub master_flow_id: Uuid,
    pub child_flow_id: Option<Uuid>,
    pub artifact_ids: Vec<Uuid>,
    pub lease_released: bool,
}

impl DeletedRecords {
    /// Flat id list in deletion order: dependents first, master last.
    pub fn all_ids(&self) -> Vec<Uuid> {
        let mut ids = self.artifact_ids.clone();
        ids.extend(self.child_flow_id);
        ids.push(self.master_flow_id);
        ids
    }
}

/// Storage operations required by the orchestration layer.
///
/// Implementations must evaluate "now" (lease expiry, staleness ages) on
/// their own clock so callers never compare timestamps across hosts.
#[async_trait]
pub trait FlowRecordStore: Send + Sync {
    /// Atomically create a master flow and its child record.
    ///
    /// The active-flow uniqueness guard runs inside the same transaction as
    /// the insert; a concurrent creator for the same
    /// `(tenant_id, scope_id, workflow_type)` gets `DuplicateActiveFlow` with
    /// the surviving flow's details.
    async fn create_flow(
        &self,
        master: NewMasterFlow,
        child: NewChildFlow,
    ) -> StoreResult<(MasterFlowRecord, ChildFlowRecord)>;

    async fn get_master(&self, master_flow_id: Uuid) -> StoreResult<MasterFlowRecord>;

    async fn get_child(&self, master_flow_id: Uuid) -> StoreResult<ChildFlowRecord>;

    /// The live flow occupying the tenant slot, if any.
    async fn find_active(
        &self,
        tenant_id: &str,
        scope_id: &str,
        workflow_type: WorkflowType,
    ) -> StoreResult<Option<MasterFlowRecord>>;

    /// All flows for a tenant scope, newest first.
    async fn list_flows(
        &self,
        tenant_id: &str,
        scope_id: &str,
    ) -> StoreResult<Vec<MasterFlowRecord>>;

    /// Compare-and-set lifecycle write. Succeeds only when the stored
    /// `version` equals `expected_version`; bumps the version and
    /// `updated_at`, replaces `status_reason`.
    async fn update_lifecycle(
        &self,
        master_flow_id: Uuid,
        expected_version: i64,
        status: LifecycleStatus,
        status_reason: Option<&str>,
    ) -> StoreResult<MasterFlowRecord>;

    /// Persist the child row (cursor, progress, runtime state, metrics,
    /// resume input) and refresh its `updated_at`.
    async fn save_child(&self, child: &ChildFlowRecord) -> StoreResult<ChildFlowRecord>;

    /// Refresh the master's `updated_at` without touching status or version.
    /// Runner heartbeats use this so health scans see forward motion.
    async fn touch_master(&self, master_flow_id: Uuid) -> StoreResult<()>;

    /// Flows with `initialized` or `running` status not touched for at least
    /// `stale_for`, oldest first, joined with their current phase. Paused
    /// flows are user-parked and never reported.
    async fn stale_active_flows(
        &self,
        stale_for: Duration,
        limit: i64,
    ) -> StoreResult<Vec<StuckFlowCandidate>>;

    /// Cascading delete in one transaction: artifacts, lease, child, then
    /// master, with a post-delete orphan check before commit.
    async fn delete_flow(&self, master_flow_id: Uuid) -> StoreResult<DeletedRecords>;

    async fn insert_artifact(
        &self,
        master_flow_id: Uuid,
        artifact: NewFlowArtifact,
    ) -> StoreResult<FlowArtifact>;

    async fn list_artifacts(&self, master_flow_id: Uuid) -> StoreResult<Vec<FlowArtifact>>;

    /// Claim the execution lease for a flow. Returns the lease when the slot
    /// was free or expired, `None` when a live holder exists.
    async fn try_acquire_lease(
        &self,
        master_flow_id: Uuid,
        holder_id: &str,
        ttl: Duration,
    ) -> StoreResult<Option<ExecutionLease>>;

    /// Extend a held lease. Returns `false` when the lease expired or was
    /// taken over, in which case the holder must stop executing.
    async fn renew_lease(
        &self,
        master_flow_id: Uuid,
        holder_id: &str,
        ttl: Duration,
    ) -> StoreResult<bool>;

    async fn release_lease(&self, master_flow_id: Uuid, holder_id: &str) -> StoreResult<()>;

    async fn find_lease(&self, master_flow_id: Uuid) -> StoreResult<Option<ExecutionLease>>;

    /// Remove leases whose expiry has passed. Returns the number removed.
    /// Called by the health monitor each sweep so dead holders do not linger.
    async fn reap_expired_leases(&self) -> StoreResult<u64>;

    /// Cheap connectivity probe for readiness checks.
    async fn ping(&self) -> StoreResult<()>;
}
