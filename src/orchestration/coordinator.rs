//! # Orchestration Coordinator
//!
//! Entry point for every flow control operation.
//!
//! ## Overview
//!
//! The coordinator owns the control plane: initialize, pause, resume,
//! cancel, status, listing, and delete all pass through it. Lifecycle
//! writes ride the master record's optimistic-lock version, so two callers
//! racing the same flow cannot both win; the loser sees the flow's fresh
//! state in an `InvalidState` error instead of silently clobbering the
//! winner. A small per-flow mutex map additionally serializes control
//! operations within this process, which keeps those conflicts rare.
//!
//! Execution itself is delegated: the coordinator flips persisted state and
//! asks the [`FlowRunner`](super::FlowRunner) to schedule or stop, never
//! running handlers inline.

use crate::error::{OrchestrationError, Result};
use crate::events::{EventPublisher, FlowEventKind, FlowLifecycleEvent};
use crate::models::{ChildFlowRecord, FlowArtifact, MasterFlowRecord, NewChildFlow, NewMasterFlow};
use crate::orchestration::concurrency_guard::{Admission, ConcurrencyGuard};
use crate::orchestration::deletion::{DeletionCoordinator, DeletionReceipt};
use crate::orchestration::execution_registry::ExecutionRegistry;
use crate::orchestration::flow_runner::FlowRunner;
use crate::state_machine::{LifecycleStatus, PhaseStateMachine};
use crate::store::{FlowRecordStore, StoreError};
use crate::workflow::{PhaseDefinition, PhaseName, WorkflowType};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Parameters for creating a new flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeRequest {
    pub tenant_id: String,
    pub scope_id: String,
    pub workflow_type: WorkflowType,
    /// Entities the workflow operates on, echoed into every phase context.
    #[serde(default)]
    pub selected_entity_ids: Vec<String>,
    /// Initial runtime state for the first phase handler.
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

/// Parameters for resuming a paused or retryable-failed flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeRequest {
    /// Restart point. Must be the current phase or an earlier one; the
    /// target and everything after it re-execute.
    #[serde(default)]
    pub target_phase: Option<PhaseName>,
    /// Payload delivered to exactly the next phase invocation.
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

/// Identifiers returned from a successful initialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowCreated {
    pub master_flow_id: Uuid,
    pub child_flow_id: Uuid,
    pub workflow_type: WorkflowType,
    pub lifecycle_status: LifecycleStatus,
    pub current_phase: PhaseName,
}

/// Result of a pause, resume, or cancel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowTransitionReceipt {
    pub master_flow_id: Uuid,
    pub lifecycle_status: LifecycleStatus,
    pub status_reason: Option<String>,
    /// False when the request was an idempotent no-op.
    pub changed: bool,
}

impl FlowTransitionReceipt {
    fn from_master(master: &MasterFlowRecord, changed: bool) -> Self {
        Self {
            master_flow_id: master.id,
            lifecycle_status: master.lifecycle_status,
            status_reason: master.status_reason.clone(),
            changed,
        }
    }
}

/// Combined view of one flow: lifecycle, phase progress, and liveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStatus {
    pub master: MasterFlowRecord,
    pub child: ChildFlowRecord,
    /// True when a background task or a live lease is executing the flow.
    pub executing: bool,
}

/// Flow control operations, one instance per process.
pub struct OrchestrationCoordinator {
    store: Arc<dyn FlowRecordStore>,
    guard: ConcurrencyGuard,
    runner: FlowRunner,
    executions: Arc<ExecutionRegistry>,
    deletion: DeletionCoordinator,
    events: EventPublisher,
    flow_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl OrchestrationCoordinator {
    pub fn new(
        store: Arc<dyn FlowRecordStore>,
        runner: FlowRunner,
        executions: Arc<ExecutionRegistry>,
        events: EventPublisher,
    ) -> Self {
        let guard = ConcurrencyGuard::new(store.clone());
        let deletion =
            DeletionCoordinator::new(store.clone(), executions.clone(), events.clone());
        Self {
            store,
            guard,
            runner,
            executions,
            deletion,
            events,
            flow_locks: DashMap::new(),
        }
    }

    /// Create a flow and schedule its background execution.
    ///
    /// At most one active flow may exist per
    /// `(tenant_id, scope_id, workflow_type)`; a second initialize against an
    /// occupied slot returns `Conflict` with the existing flow's details.
    #[instrument(skip(self, request), fields(
        tenant_id = %request.tenant_id,
        scope_id = %request.scope_id,
        workflow_type = %request.workflow_type,
    ))]
    pub async fn initialize(&self, request: InitializeRequest) -> Result<FlowCreated> {
        if request.tenant_id.trim().is_empty() {
            return Err(OrchestrationError::validation(
                "tenant_id",
                "must not be empty",
            ));
        }
        if request.scope_id.trim().is_empty() {
            return Err(OrchestrationError::validation(
                "scope_id",
                "must not be empty",
            ));
        }

        // Friendly early rejection; the store's guarded insert remains the
        // authoritative arbiter under creation races.
        match self
            .guard
            .try_acquire(&request.tenant_id, &request.scope_id, request.workflow_type)
            .await?
        {
            Admission::Granted => {}
            Admission::Denied {
                existing_flow_id,
                existing_status,
                existing_phase,
            } => {
                return Err(OrchestrationError::Conflict {
                    tenant_id: request.tenant_id,
                    scope_id: request.scope_id,
                    workflow_type: request.workflow_type,
                    existing_flow_id,
                    existing_status,
                    existing_phase,
                });
            }
        }

        let definition = PhaseDefinition::for_workflow(request.workflow_type);
        let input = request.input.unwrap_or_else(|| serde_json::json!({}));
        let (master, child) = self
            .store
            .create_flow(
                NewMasterFlow::new(request.tenant_id, request.scope_id, request.workflow_type),
                NewChildFlow::for_definition(&definition, request.selected_entity_ids, input),
            )
            .await?;

        self.publish(&master, FlowEventKind::FlowInitialized);
        if let Err(error) = self.runner.spawn(master.id).await {
            // The records are durable; an initialized flow nobody executes
            // is eventually reclaimed by the health monitor.
            warn!(error = %error, "Background scheduling failed after initialize");
        }
        info!(master_flow_id = %master.id, phase = %child.current_phase, "Flow initialized");

        Ok(FlowCreated {
            master_flow_id: master.id,
            child_flow_id: child.id,
            workflow_type: master.workflow_type,
            lifecycle_status: master.lifecycle_status,
            current_phase: child.current_phase,
        })
    }

    /// Pause a running flow.
    ///
    /// The stop is cooperative: the in-flight phase handler finishes and its
    /// result is persisted, then the runner exits at the phase boundary.
    #[instrument(skip(self), fields(master_flow_id = %master_flow_id))]
    pub async fn pause(&self, master_flow_id: Uuid) -> Result<FlowTransitionReceipt> {
        let lock = self.flow_lock(master_flow_id);
        let _guard = lock.lock().await;

        let master = self.store.get_master(master_flow_id).await?;
        if master.lifecycle_status != LifecycleStatus::Running {
            return Err(OrchestrationError::invalid_state(
                master_flow_id,
                master.lifecycle_status,
                "pause",
            ));
        }

        let updated = match self
            .store
            .update_lifecycle(
                master_flow_id,
                master.version,
                LifecycleStatus::Paused,
                None,
            )
            .await
        {
            Ok(updated) => updated,
            Err(StoreError::VersionConflict { .. }) => {
                let fresh = self.store.get_master(master_flow_id).await?;
                return Err(OrchestrationError::invalid_state(
                    master_flow_id,
                    fresh.lifecycle_status,
                    "pause",
                ));
            }
            Err(error) => return Err(error.into()),
        };

        self.executions.request_stop(master_flow_id);
        let child = self.store.get_child(master_flow_id).await?;
        self.publish(
            &updated,
            FlowEventKind::FlowPaused {
                at_phase: child.current_phase,
            },
        );
        info!(at_phase = %child.current_phase, "Flow paused");
        Ok(FlowTransitionReceipt::from_master(&updated, true))
    }

    /// Resume a paused flow, or a failed flow whose failed phase is
    /// retryable.
    ///
    /// With no `target_phase` execution continues from the current phase;
    /// completed phases are never re-run. A `target_phase` rewinds the
    /// cursor backward and re-executes the target and everything after it.
    #[instrument(skip(self, request), fields(master_flow_id = %master_flow_id))]
    pub async fn resume(
        &self,
        master_flow_id: Uuid,
        request: ResumeRequest,
    ) -> Result<FlowTransitionReceipt> {
        let lock = self.flow_lock(master_flow_id);
        let _guard = lock.lock().await;

        let master = self.store.get_master(master_flow_id).await?;
        if !master.lifecycle_status.is_resumable() {
            return Err(OrchestrationError::invalid_state(
                master_flow_id,
                master.lifecycle_status,
                "resume",
            ));
        }
        // The previous runner must have fully drained before progress is
        // rewritten underneath it.
        if self.executing(master_flow_id).await? {
            return Err(OrchestrationError::FlowExecuting { master_flow_id });
        }

        let mut child = self.store.get_child(master_flow_id).await?;
        let machine = PhaseStateMachine::for_workflow(master.workflow_type);

        if master.lifecycle_status == LifecycleStatus::Failed {
            // Retryability gates re-running a phase that failed. A pending
            // cursor under a failed master means an earlier resume already
            // rewound the child; that resume just gets finished.
            let cursor_failed = child
                .phase_progress
                .status_of(child.current_phase)
                .is_some_and(|status| status.is_failed());
            if cursor_failed && !machine.definition().is_retryable(child.current_phase) {
                return Err(OrchestrationError::InvalidState {
                    master_flow_id,
                    current_status: master.lifecycle_status,
                    requested: format!(
                        "resume: failed phase '{}' is not retryable",
                        child.current_phase
                    ),
                });
            }
            // Clear the failure so the runner re-executes the phase.
            child.phase_progress.reset_from(child.current_phase);
        }

        if let Some(target) = request.target_phase {
            let outcome = machine.rewind(&child.phase_progress, child.current_phase, target)?;
            child.phase_progress = outcome.progress;
            child.current_phase = outcome.current_phase;
        }
        // The child rewind lands before the master CAS. A crash between the
        // two writes leaves a paused or failed flow whose cursor is already
        // rewound; a repeated resume accepts that state and the rewind is
        // idempotent. The reverse order would leave a Running flow with no
        // runner and stale progress until the health monitor reaped it.
        child.resume_input = request.input;
        let child = self.store.save_child(&child).await?;

        let updated = match self
            .store
            .update_lifecycle(
                master_flow_id,
                master.version,
                LifecycleStatus::Running,
                None,
            )
            .await
        {
            Ok(updated) => updated,
            Err(StoreError::VersionConflict { .. }) => {
                let fresh = self.store.get_master(master_flow_id).await?;
                return Err(OrchestrationError::invalid_state(
                    master_flow_id,
                    fresh.lifecycle_status,
                    "resume",
                ));
            }
            Err(error) => return Err(error.into()),
        };

        self.publish(
            &updated,
            FlowEventKind::FlowResumed {
                from_phase: child.current_phase,
            },
        );
        match self.runner.spawn(master_flow_id).await {
            Ok(_) => {}
            Err(OrchestrationError::FlowExecuting { .. }) => {
                debug!("Execution already underway after resume");
            }
            Err(error) => {
                warn!(error = %error, "Background scheduling failed after resume");
            }
        }
        info!(from_phase = %child.current_phase, "Flow resumed");
        Ok(FlowTransitionReceipt::from_master(&updated, true))
    }

    /// Cancel a flow from any non-terminal state. Completed phases are not
    /// rolled back. Cancelling an already-terminal flow is a no-op.
    #[instrument(skip(self), fields(master_flow_id = %master_flow_id))]
    pub async fn cancel(
        &self,
        master_flow_id: Uuid,
        reason: Option<String>,
    ) -> Result<FlowTransitionReceipt> {
        let lock = self.flow_lock(master_flow_id);
        let _guard = lock.lock().await;

        let mut master = self.store.get_master(master_flow_id).await?;
        if master.lifecycle_status.is_terminal() {
            debug!(status = %master.lifecycle_status, "Cancel of a terminal flow is a no-op");
            self.discard_flow_lock(master_flow_id);
            return Ok(FlowTransitionReceipt::from_master(&master, false));
        }
        let status_reason = reason
            .clone()
            .unwrap_or_else(|| "user_requested".to_string());

        // Cancel is legal from every non-terminal state, so a lost CAS only
        // means the status moved; re-read and retry unless it went terminal.
        let mut updated = None;
        for _ in 0..3 {
            match self
                .store
                .update_lifecycle(
                    master_flow_id,
                    master.version,
                    LifecycleStatus::Cancelled,
                    Some(&status_reason),
                )
                .await
            {
                Ok(record) => {
                    updated = Some(record);
                    break;
                }
                Err(StoreError::VersionConflict { .. }) => {
                    master = self.store.get_master(master_flow_id).await?;
                    if master.lifecycle_status.is_terminal() {
                        self.discard_flow_lock(master_flow_id);
                        return Ok(FlowTransitionReceipt::from_master(&master, false));
                    }
                }
                Err(error) => return Err(error.into()),
            }
        }
        let Some(updated) = updated else {
            return Err(OrchestrationError::persistence(
                "cancel_flow",
                "lifecycle version conflicts exhausted",
            ));
        };

        self.executions.request_stop(master_flow_id);
        self.publish(&updated, FlowEventKind::FlowCancelled { reason });
        self.discard_flow_lock(master_flow_id);
        info!("Flow cancelled");
        Ok(FlowTransitionReceipt::from_master(&updated, true))
    }

    /// Current lifecycle, phase progress, and executor liveness for a flow.
    pub async fn status(&self, master_flow_id: Uuid) -> Result<FlowStatus> {
        let master = self.store.get_master(master_flow_id).await?;
        let child = self.store.get_child(master_flow_id).await?;
        let executing = self.executing(master_flow_id).await?;
        // Flows settle outside the coordinator when a runner completes or
        // fails them, so the read path sweeps their lock entries.
        if master.lifecycle_status.is_terminal() && !executing {
            self.discard_flow_lock(master_flow_id);
        }
        Ok(FlowStatus {
            master,
            child,
            executing,
        })
    }

    /// All flows for a tenant scope, newest first.
    pub async fn list_flows(
        &self,
        tenant_id: &str,
        scope_id: &str,
    ) -> Result<Vec<MasterFlowRecord>> {
        Ok(self.store.list_flows(tenant_id, scope_id).await?)
    }

    /// Artifacts produced by a flow's phases, oldest first.
    pub async fn artifacts(&self, master_flow_id: Uuid) -> Result<Vec<FlowArtifact>> {
        // Distinguish "unknown flow" from "no artifacts yet".
        self.store.get_master(master_flow_id).await?;
        Ok(self.store.list_artifacts(master_flow_id).await?)
    }

    /// Delete a flow and everything attached to it. See
    /// [`DeletionCoordinator::delete`] for the actor and force semantics.
    pub async fn delete(
        &self,
        master_flow_id: Uuid,
        actor: &str,
        force: bool,
    ) -> Result<DeletionReceipt> {
        let lock = self.flow_lock(master_flow_id);
        let _guard = lock.lock().await;
        let receipt = self.deletion.delete(master_flow_id, actor, force).await?;
        self.discard_flow_lock(master_flow_id);
        Ok(receipt)
    }

    async fn executing(&self, master_flow_id: Uuid) -> Result<bool> {
        if self.executions.is_executing(master_flow_id) {
            return Ok(true);
        }
        let lease = self.store.find_lease(master_flow_id).await?;
        Ok(lease
            .map(|lease| lease.is_live(Utc::now()))
            .unwrap_or(false))
    }

    fn flow_lock(&self, master_flow_id: Uuid) -> Arc<Mutex<()>> {
        self.flow_locks
            .entry(master_flow_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop a settled flow's lock entry. A late caller re-creates one on
    /// demand; the master record's version CAS, not this map, decides who
    /// wins a racing write.
    fn discard_flow_lock(&self, master_flow_id: Uuid) {
        self.flow_locks.remove(&master_flow_id);
    }

    fn publish(&self, master: &MasterFlowRecord, kind: FlowEventKind) {
        self.events.publish(FlowLifecycleEvent::new(
            master.id,
            master.tenant_id.clone(),
            master.workflow_type,
            kind,
        ));
    }
}
