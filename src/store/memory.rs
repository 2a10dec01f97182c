//! # In-Memory Flow Record Store
//!
//! Map-backed `FlowRecordStore` with the same guard, CAS, and lease
//! semantics as the PostgreSQL store. Tests and embedded scenarios use it to
//! exercise the full orchestration stack without a database.

use crate::models::{
    ChildFlowRecord, ExecutionLease, FlowArtifact, MasterFlowRecord, NewChildFlow, NewFlowArtifact,
    NewMasterFlow, StuckFlowCandidate,
};
use crate::state_machine::LifecycleStatus;
use crate::store::{DeletedRecords, FlowRecordStore, StoreError, StoreResult};
use crate::workflow::WorkflowType;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    masters: HashMap<Uuid, MasterFlowRecord>,
    /// Keyed by master flow id (1:1 composition).
    children: HashMap<Uuid, ChildFlowRecord>,
    artifacts: HashMap<Uuid, Vec<FlowArtifact>>,
    leases: HashMap<Uuid, ExecutionLease>,
}

/// Process-local store for tests and embedded use.
#[derive(Default)]
pub struct InMemoryFlowRecordStore {
    inner: RwLock<Inner>,
}

impl InMemoryFlowRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of master flows currently stored, active or terminal.
    pub fn flow_count(&self) -> usize {
        self.inner.read().masters.len()
    }

    /// Backdate a master's `updated_at`, for staleness scenarios in tests.
    pub fn age_master(&self, master_flow_id: Uuid, by: Duration) {
        if let Some(master) = self.inner.write().masters.get_mut(&master_flow_id) {
            master.updated_at -= by;
        }
    }

    /// Backdate a lease's expiry, for takeover scenarios in tests.
    pub fn expire_lease(&self, master_flow_id: Uuid) {
        if let Some(lease) = self.inner.write().leases.get_mut(&master_flow_id) {
            lease.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}

#[async_trait]
impl FlowRecordStore for InMemoryFlowRecordStore {
    async fn create_flow(
        &self,
        master: NewMasterFlow,
        child: NewChildFlow,
    ) -> StoreResult<(MasterFlowRecord, ChildFlowRecord)> {
        let mut inner = self.inner.write();

        // Guard and insert under one lock, matching the transactional
        // uniqueness check in the SQL store.
        let existing = inner.masters.values().find(|m| {
            m.tenant_id == master.tenant_id
                && m.scope_id == master.scope_id
                && m.workflow_type == master.workflow_type
                && m.is_active()
        });
        if let Some(existing) = existing {
            let existing_phase = inner
                .children
                .get(&existing.id)
                .map(|child| child.current_phase);
            return Err(StoreError::DuplicateActiveFlow {
                tenant_id: master.tenant_id,
                scope_id: master.scope_id,
                workflow_type: master.workflow_type,
                existing_flow_id: existing.id,
                existing_status: existing.lifecycle_status,
                existing_phase,
            });
        }

        let now = Utc::now();
        let master_record = MasterFlowRecord {
            id: Uuid::new_v4(),
            tenant_id: master.tenant_id,
            scope_id: master.scope_id,
            workflow_type: master.workflow_type,
            lifecycle_status: LifecycleStatus::Initialized,
            status_reason: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let child_record = ChildFlowRecord {
            id: Uuid::new_v4(),
            master_flow_id: master_record.id,
            current_phase: child.current_phase,
            phase_progress: child.phase_progress,
            runtime_state: child.runtime_state,
            resume_input: None,
            metrics: Default::default(),
            selected_entity_ids: child.selected_entity_ids,
            created_at: now,
            updated_at: now,
        };

        inner.masters.insert(master_record.id, master_record.clone());
        inner
            .children
            .insert(master_record.id, child_record.clone());
        Ok((master_record, child_record))
    }

    async fn get_master(&self, master_flow_id: Uuid) -> StoreResult<MasterFlowRecord> {
        self.inner
            .read()
            .masters
            .get(&master_flow_id)
            .cloned()
            .ok_or(StoreError::MasterNotFound { master_flow_id })
    }

    async fn get_child(&self, master_flow_id: Uuid) -> StoreResult<ChildFlowRecord> {
        self.inner
            .read()
            .children
            .get(&master_flow_id)
            .cloned()
            .ok_or(StoreError::ChildNotFound { master_flow_id })
    }

    async fn find_active(
        &self,
        tenant_id: &str,
        scope_id: &str,
        workflow_type: WorkflowType,
    ) -> StoreResult<Option<MasterFlowRecord>> {
        Ok(self
            .inner
            .read()
            .masters
            .values()
            .find(|m| {
                m.tenant_id == tenant_id
                    && m.scope_id == scope_id
                    && m.workflow_type == workflow_type
                    && m.is_active()
            })
            .cloned())
    }

    async fn list_flows(
        &self,
        tenant_id: &str,
        scope_id: &str,
    ) -> StoreResult<Vec<MasterFlowRecord>> {
        let mut flows: Vec<MasterFlowRecord> = self
            .inner
            .read()
            .masters
            .values()
            .filter(|m| m.tenant_id == tenant_id && m.scope_id == scope_id)
            .cloned()
            .collect();
        flows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(flows)
    }

    async fn update_lifecycle(
        &self,
        master_flow_id: Uuid,
        expected_version: i64,
        status: LifecycleStatus,
        status_reason: Option<&str>,
    ) -> StoreResult<MasterFlowRecord> {
        let mut inner = self.inner.write();
        let master = inner
            .masters
            .get_mut(&master_flow_id)
            .ok_or(StoreError::MasterNotFound { master_flow_id })?;
        if master.version != expected_version {
            return Err(StoreError::VersionConflict {
                master_flow_id,
                expected: expected_version,
                actual: master.version,
            });
        }
        master.lifecycle_status = status;
        master.status_reason = status_reason.map(str::to_string);
        master.version += 1;
        master.updated_at = Utc::now();
        Ok(master.clone())
    }

    async fn save_child(&self, child: &ChildFlowRecord) -> StoreResult<ChildFlowRecord> {
        let mut inner = self.inner.write();
        let stored = inner
            .children
            .get_mut(&child.master_flow_id)
            .ok_or(StoreError::ChildNotFound {
                master_flow_id: child.master_flow_id,
            })?;
        let mut updated = child.clone();
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn touch_master(&self, master_flow_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let master = inner
            .masters
            .get_mut(&master_flow_id)
            .ok_or(StoreError::MasterNotFound { master_flow_id })?;
        master.updated_at = Utc::now();
        Ok(())
    }

    async fn stale_active_flows(
        &self,
        stale_for: Duration,
        limit: i64,
    ) -> StoreResult<Vec<StuckFlowCandidate>> {
        let now = Utc::now();
        let inner = self.inner.read();
        let mut candidates: Vec<StuckFlowCandidate> = inner
            .masters
            .values()
            .filter(|m| {
                matches!(
                    m.lifecycle_status,
                    LifecycleStatus::Initialized | LifecycleStatus::Running
                ) && now - m.updated_at >= stale_for
            })
            .filter_map(|m| {
                let child = inner.children.get(&m.id)?;
                Some(StuckFlowCandidate {
                    master: m.clone(),
                    current_phase: child.current_phase,
                    stale_for_secs: (now - m.updated_at).num_seconds(),
                })
            })
            .collect();
        candidates.sort_by(|a, b| a.master.updated_at.cmp(&b.master.updated_at));
        candidates.truncate(limit.max(0) as usize);
        Ok(candidates)
    }

    async fn delete_flow(&self, master_flow_id: Uuid) -> StoreResult<DeletedRecords> {
        let mut inner = self.inner.write();
        inner
            .masters
            .remove(&master_flow_id)
            .ok_or(StoreError::MasterNotFound { master_flow_id })?;
        let child_flow_id = inner
            .children
            .remove(&master_flow_id)
            .map(|child| child.id);
        let artifact_ids = inner
            .artifacts
            .remove(&master_flow_id)
            .map(|artifacts| artifacts.into_iter().map(|a| a.id).collect())
            .unwrap_or_default();
        let lease_released = inner.leases.remove(&master_flow_id).is_some();
        Ok(DeletedRecords {
            master_flow_id,
            child_flow_id,
            artifact_ids,
            lease_released,
        })
    }

    async fn insert_artifact(
        &self,
        master_flow_id: Uuid,
        artifact: NewFlowArtifact,
    ) -> StoreResult<FlowArtifact> {
        let mut inner = self.inner.write();
        if !inner.masters.contains_key(&master_flow_id) {
            return Err(StoreError::MasterNotFound { master_flow_id });
        }
        let record = FlowArtifact {
            id: Uuid::new_v4(),
            master_flow_id,
            kind: artifact.kind,
            payload: artifact.payload,
            created_at: Utc::now(),
        };
        inner
            .artifacts
            .entry(master_flow_id)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn list_artifacts(&self, master_flow_id: Uuid) -> StoreResult<Vec<FlowArtifact>> {
        Ok(self
            .inner
            .read()
            .artifacts
            .get(&master_flow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn try_acquire_lease(
        &self,
        master_flow_id: Uuid,
        holder_id: &str,
        ttl: Duration,
    ) -> StoreResult<Option<ExecutionLease>> {
        let now = Utc::now();
        let mut inner = self.inner.write();
        if let Some(existing) = inner.leases.get(&master_flow_id) {
            if existing.is_live(now) && existing.holder_id != holder_id {
                return Ok(None);
            }
        }
        let lease = ExecutionLease {
            master_flow_id,
            holder_id: holder_id.to_string(),
            acquired_at: now,
            heartbeat_at: now,
            expires_at: now + ttl,
        };
        inner.leases.insert(master_flow_id, lease.clone());
        Ok(Some(lease))
    }

    async fn renew_lease(
        &self,
        master_flow_id: Uuid,
        holder_id: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = Utc::now();
        let mut inner = self.inner.write();
        match inner.leases.get_mut(&master_flow_id) {
            Some(lease) if lease.is_held_by(holder_id, now) => {
                lease.heartbeat_at = now;
                lease.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, master_flow_id: Uuid, holder_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if let Some(lease) = inner.leases.get(&master_flow_id) {
            if lease.holder_id == holder_id {
                inner.leases.remove(&master_flow_id);
            }
        }
        Ok(())
    }

    async fn find_lease(&self, master_flow_id: Uuid) -> StoreResult<Option<ExecutionLease>> {
        Ok(self.inner.read().leases.get(&master_flow_id).cloned())
    }

    async fn reap_expired_leases(&self) -> StoreResult<u64> {
        let now = Utc::now();
        let mut inner = self.inner.write();
        let before = inner.leases.len();
        inner.leases.retain(|_, lease| lease.is_live(now));
        Ok((before - inner.leases.len()) as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
