//! # Deletion Coordinator
//!
//! Cascading removal of a flow and everything attached to it.
//!
//! ## Overview
//!
//! Deletion refuses flows with a live executor (a local background task or a
//! live lease held by any process) unless the caller forces it. A forced
//! delete signals the local runner to stop, then removes the records
//! immediately; a remote executor dies on its next read when the master row
//! is gone. The store performs the removal in one transaction, dependents
//! first, and verifies no orphaned rows remain before committing.

use crate::error::{OrchestrationError, Result};
use crate::events::{EventPublisher, FlowEventKind, FlowLifecycleEvent};
use crate::orchestration::execution_registry::ExecutionRegistry;
use crate::store::FlowRecordStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// What a completed delete removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionReceipt {
    pub master_flow_id: Uuid,
    /// Every removed record id, dependents first, master last.
    pub deleted_ids: Vec<Uuid>,
    /// True when the delete overrode a live execution.
    pub interrupted_execution: bool,
    /// Caller-supplied identity echoed back for audit trails.
    pub actor: String,
}

pub struct DeletionCoordinator {
    store: Arc<dyn FlowRecordStore>,
    executions: Arc<ExecutionRegistry>,
    events: EventPublisher,
}

impl DeletionCoordinator {
    pub fn new(
        store: Arc<dyn FlowRecordStore>,
        executions: Arc<ExecutionRegistry>,
        events: EventPublisher,
    ) -> Self {
        Self {
            store,
            executions,
            events,
        }
    }

    /// Delete a flow and its child record, artifacts, and lease.
    ///
    /// `actor` names who asked and lands in the audit log and receipt.
    /// Returns `FlowExecuting` when an executor is live and `force` is not
    /// set. Terminal, paused, and never-scheduled flows delete without force.
    #[instrument(skip(self), fields(master_flow_id = %master_flow_id, actor, force))]
    pub async fn delete(
        &self,
        master_flow_id: Uuid,
        actor: &str,
        force: bool,
    ) -> Result<DeletionReceipt> {
        let master = self.store.get_master(master_flow_id).await?;

        let locally_executing = self.executions.is_executing(master_flow_id);
        let lease_live = self
            .store
            .find_lease(master_flow_id)
            .await?
            .map(|lease| lease.is_live(Utc::now()))
            .unwrap_or(false);
        let executing = locally_executing || lease_live;

        if executing && !force {
            return Err(OrchestrationError::FlowExecuting { master_flow_id });
        }
        if executing {
            warn!(
                status = %master.lifecycle_status,
                locally_executing,
                "Force delete of an executing flow"
            );
            self.executions.request_stop(master_flow_id);
        }

        let deleted = self.store.delete_flow(master_flow_id).await?;
        self.events.publish(FlowLifecycleEvent::new(
            master_flow_id,
            master.tenant_id.clone(),
            master.workflow_type,
            FlowEventKind::FlowDeleted,
        ));

        let deleted_ids = deleted.all_ids();
        info!(records = deleted_ids.len(), "Flow deleted");
        Ok(DeletionReceipt {
            master_flow_id,
            deleted_ids,
            interrupted_execution: executing,
            actor: actor.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewChildFlow, NewMasterFlow};
    use crate::store::{InMemoryFlowRecordStore, StoreError};
    use crate::workflow::{PhaseDefinition, WorkflowType};

    struct Env {
        store: Arc<InMemoryFlowRecordStore>,
        executions: Arc<ExecutionRegistry>,
        deletion: DeletionCoordinator,
    }

    fn env() -> Env {
        let store: Arc<InMemoryFlowRecordStore> = Arc::new(InMemoryFlowRecordStore::new());
        let executions = Arc::new(ExecutionRegistry::new());
        let deletion = DeletionCoordinator::new(
            store.clone(),
            executions.clone(),
            EventPublisher::default(),
        );
        Env {
            store,
            executions,
            deletion,
        }
    }

    async fn seed_flow(store: &InMemoryFlowRecordStore) -> Uuid {
        let definition = PhaseDefinition::for_workflow(WorkflowType::Assessment);
        let (master, _) = store
            .create_flow(
                NewMasterFlow::new("acme", "prod", WorkflowType::Assessment),
                NewChildFlow::for_definition(&definition, vec![], serde_json::json!({})),
            )
            .await
            .unwrap();
        master.id
    }

    #[tokio::test]
    async fn test_delete_idle_flow_removes_everything() {
        let env = env();
        let flow_id = seed_flow(&env.store).await;
        env.store
            .insert_artifact(
                flow_id,
                crate::models::NewFlowArtifact::new("report", serde_json::json!({"n": 1})),
            )
            .await
            .unwrap();

        let receipt = env.deletion.delete(flow_id, "tester", false).await.unwrap();
        assert_eq!(receipt.master_flow_id, flow_id);
        // One artifact, the child, and the master.
        assert_eq!(receipt.deleted_ids.len(), 3);
        assert!(!receipt.interrupted_execution);
        assert_eq!(receipt.actor, "tester");

        assert!(matches!(
            env.store.get_master(flow_id).await,
            Err(StoreError::MasterNotFound { .. })
        ));
        assert!(matches!(
            env.store.get_child(flow_id).await,
            Err(StoreError::ChildNotFound { .. })
        ));
        assert!(env.store.list_artifacts(flow_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_refuses_executing_flow_without_force() {
        let env = env();
        let flow_id = seed_flow(&env.store).await;
        env.store
            .try_acquire_lease(flow_id, "runner-elsewhere", chrono::Duration::seconds(60))
            .await
            .unwrap();

        let err = env.deletion.delete(flow_id, "tester", false).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::FlowExecuting { master_flow_id } if master_flow_id == flow_id
        ));
        assert!(env.store.get_master(flow_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_force_delete_overrides_live_lease() {
        let env = env();
        let flow_id = seed_flow(&env.store).await;
        env.store
            .try_acquire_lease(flow_id, "runner-elsewhere", chrono::Duration::seconds(60))
            .await
            .unwrap();

        let receipt = env.deletion.delete(flow_id, "tester", true).await.unwrap();
        assert!(receipt.interrupted_execution);
        assert!(env.store.find_lease(flow_id).await.unwrap().is_none());
        assert!(matches!(
            env.store.get_master(flow_id).await,
            Err(StoreError::MasterNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_force_delete_signals_local_runner() {
        let env = env();
        let flow_id = seed_flow(&env.store).await;
        let handle = env.executions.try_register(flow_id).unwrap();

        let receipt = env.deletion.delete(flow_id, "tester", true).await.unwrap();
        assert!(receipt.interrupted_execution);
        assert!(handle.stop_requested());
    }

    #[tokio::test]
    async fn test_delete_unknown_flow_is_not_found() {
        let env = env();
        let err = env
            .deletion
            .delete(Uuid::new_v4(), "tester", false)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::NotFound { .. }));
    }
}
