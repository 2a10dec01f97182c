//! # Background Flow Runner
//!
//! Executes one flow's phases sequentially on a spawned tokio task.
//!
//! ## Overview
//!
//! `FlowRunner::spawn` is the single scheduling entry point. It is
//! idempotent at two levels: the process-local execution registry rejects a
//! duplicate task for a flow this process already runs, and the storage
//! lease rejects execution while another process holds the flow. Exactly one
//! background task per flow can therefore exist across the fleet.
//!
//! The run loop re-checks the persisted lifecycle and the cooperative stop
//! flag at every phase boundary, so pause and cancel take effect after the
//! in-flight handler reaches its checkpoint, never mid-write. While a
//! handler executes, the runner keeps renewing its lease and touching the
//! master record; a lost lease means another process took the flow over and
//! this runner abandons it without further writes.
//!
//! Handler results are durable before the next phase starts: artifacts
//! first, then the child row (cursor, progress, runtime state, metrics),
//! then the master heartbeat. Storage failures inside the loop are retried
//! with a short backoff; if they persist the flow is marked failed with
//! reason `persistence_error` rather than left dangling.

use crate::config::ExecutionConfig;
use crate::error::{OrchestrationError, Result};
use crate::events::{EventPublisher, FlowEventKind, FlowLifecycleEvent};
use crate::models::{ChildFlowRecord, MasterFlowRecord};
use crate::orchestration::execution_registry::{ExecutionRegistry, RunnerHandle};
use crate::registry::{PhaseContext, PhaseHandlerRegistry};
use crate::state_machine::{
    FlowDisposition, FlowEvent, LifecycleStatus, PhaseStateMachine,
};
use crate::store::{FlowRecordStore, StoreError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Background executor for flow phases.
#[derive(Clone)]
pub struct FlowRunner {
    store: Arc<dyn FlowRecordStore>,
    handlers: Arc<PhaseHandlerRegistry>,
    executions: Arc<ExecutionRegistry>,
    events: EventPublisher,
    config: ExecutionConfig,
    holder_id: String,
}

impl FlowRunner {
    pub fn new(
        store: Arc<dyn FlowRecordStore>,
        handlers: Arc<PhaseHandlerRegistry>,
        executions: Arc<ExecutionRegistry>,
        events: EventPublisher,
        config: ExecutionConfig,
    ) -> Self {
        let holder_id = format!(
            "runner-{}-{}",
            std::process::id(),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        Self {
            store,
            handlers,
            executions,
            events,
            config,
            holder_id,
        }
    }

    /// Lease holder identity of this runner, `runner-{pid}-{nonce}`.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Schedule background execution for a flow.
    ///
    /// Returns `Ok(false)` when this process already executes the flow (the
    /// duplicate request is a no-op) and `FlowExecuting` when another
    /// process holds a live lease on it.
    #[instrument(skip(self), fields(master_flow_id = %master_flow_id, holder_id = %self.holder_id))]
    pub async fn spawn(&self, master_flow_id: Uuid) -> Result<bool> {
        let Some(handle) = self.executions.try_register(master_flow_id) else {
            debug!("Flow already executing in this process, scheduling skipped");
            return Ok(false);
        };

        let lease = self
            .store
            .try_acquire_lease(master_flow_id, &self.holder_id, self.config.lease_ttl())
            .await;
        match lease {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.executions.deregister(master_flow_id);
                debug!("Execution lease held elsewhere, scheduling rejected");
                return Err(OrchestrationError::FlowExecuting { master_flow_id });
            }
            Err(error) => {
                self.executions.deregister(master_flow_id);
                return Err(error.into());
            }
        }

        let runner = self.clone();
        tokio::spawn(async move {
            runner.run(handle).await;
        });
        Ok(true)
    }

    #[instrument(skip(self, handle), fields(master_flow_id = %handle.master_flow_id(), holder_id = %self.holder_id))]
    async fn run(self, handle: Arc<RunnerHandle>) {
        let master_flow_id = handle.master_flow_id();
        if let Err(error) = self.execute_flow(master_flow_id, &handle).await {
            error!(error = %error, "Flow execution aborted");
            self.record_abort(master_flow_id).await;
        }
        self.executions.deregister(master_flow_id);
        if let Err(error) = self
            .store
            .release_lease(master_flow_id, &self.holder_id)
            .await
        {
            warn!(error = %error, "Lease release failed");
        }
    }

    async fn execute_flow(&self, master_flow_id: Uuid, handle: &RunnerHandle) -> Result<()> {
        let mut master = self.store.get_master(master_flow_id).await?;
        let mut child = self.store.get_child(master_flow_id).await?;
        let machine = PhaseStateMachine::for_workflow(master.workflow_type);

        // Promote freshly created flows; anything not runnable exits quietly.
        match master.lifecycle_status {
            LifecycleStatus::Initialized => {
                match self
                    .try_set_lifecycle(&master, LifecycleStatus::Running, None)
                    .await?
                {
                    Some(updated) => master = updated,
                    None => return Ok(()),
                }
            }
            LifecycleStatus::Running => {}
            status => {
                debug!(status = %status, "Flow not runnable, exiting");
                return Ok(());
            }
        }
        self.publish(&master, FlowEventKind::ExecutionStarted);

        let period = self.config.heartbeat_interval();
        let mut heartbeat =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // Phase boundary: observe stop requests and lifecycle changes
            // made by the coordinator or another process.
            master = self.store.get_master(master_flow_id).await?;
            if handle.stop_requested() || master.lifecycle_status != LifecycleStatus::Running {
                debug!(
                    status = %master.lifecycle_status,
                    stop_requested = handle.stop_requested(),
                    "Stopping at phase boundary"
                );
                return Ok(());
            }

            // Skip phases a rewindless resume already finished.
            while child
                .phase_progress
                .status_of(child.current_phase)
                .map(|status| status.is_completed())
                .unwrap_or(false)
            {
                match machine.definition().next_after(child.current_phase) {
                    Some(next) => child.current_phase = next,
                    None => {
                        self.complete_flow(&master).await?;
                        return Ok(());
                    }
                }
            }

            let phase = child.current_phase;
            let Some(handler) = self.handlers.get(master.workflow_type, phase) else {
                let detail = format!(
                    "no handler registered for {} phase '{phase}'",
                    master.workflow_type
                );
                self.fail_phase(&master, &mut child, &machine, &detail, "handler_missing")
                    .await?;
                return Ok(());
            };
            let timeout = machine
                .definition()
                .spec(phase)
                .and_then(|spec| spec.timeout)
                .unwrap_or_else(|| self.config.default_phase_timeout());

            child.phase_progress.mark_started(phase, Utc::now());
            child = self.save_child_with_retry(&child).await?;
            self.store.touch_master(master_flow_id).await?;
            self.publish(&master, FlowEventKind::PhaseStarted { phase });
            info!(phase = %phase, "Phase started");

            let context = PhaseContext {
                master_flow_id,
                tenant_id: master.tenant_id.clone(),
                scope_id: master.scope_id.clone(),
                workflow_type: master.workflow_type,
                phase,
                runtime_state: child.runtime_state.clone(),
                selected_entity_ids: child.selected_entity_ids.clone(),
                resume_input: child.resume_input.clone(),
            };

            let execution = handler.execute(context);
            tokio::pin!(execution);
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            // Heartbeats keep flowing while the handler works; the lease and
            // the master's updated_at are the fleet-visible liveness signal.
            let phase_result = loop {
                tokio::select! {
                    result = &mut execution => break Some(result),
                    _ = &mut deadline => break None,
                    _ = heartbeat.tick() => {
                        match self
                            .store
                            .renew_lease(master_flow_id, &self.holder_id, self.config.lease_ttl())
                            .await
                        {
                            Ok(true) => {
                                if let Err(error) = self.store.touch_master(master_flow_id).await {
                                    warn!(error = %error, "Heartbeat touch failed");
                                }
                            }
                            Ok(false) => {
                                warn!(phase = %phase, "Execution lease lost, abandoning flow");
                                return Ok(());
                            }
                            Err(error) => warn!(error = %error, "Lease renewal failed"),
                        }
                    }
                }
            };

            // Resume input is delivered to exactly one invocation.
            child.resume_input = None;

            match phase_result {
                Some(Ok(outcome)) => {
                    for artifact in &outcome.artifacts {
                        self.store
                            .insert_artifact(master_flow_id, artifact.clone())
                            .await?;
                    }
                    let transition =
                        machine.apply(&child.phase_progress, phase, &FlowEvent::PhaseSucceeded)?;
                    child.phase_progress = transition.progress;
                    child.current_phase = transition.current_phase;
                    child.runtime_state = outcome.runtime_state;
                    child.metrics.merge(&outcome.metrics);
                    child = self.save_child_with_retry(&child).await?;
                    self.store.touch_master(master_flow_id).await?;
                    self.publish(&master, FlowEventKind::PhaseCompleted { phase });
                    info!(phase = %phase, "Phase completed");

                    if transition.disposition == FlowDisposition::Completed {
                        self.complete_flow(&master).await?;
                        return Ok(());
                    }
                }
                Some(Err(phase_error)) => {
                    self.publish(
                        &master,
                        FlowEventKind::PhaseFailed {
                            phase,
                            error: phase_error.message.clone(),
                        },
                    );
                    self.fail_phase(&master, &mut child, &machine, &phase_error.message, "phase_failed")
                        .await?;
                    return Ok(());
                }
                None => {
                    let detail =
                        format!("phase '{phase}' timed out after {}s", timeout.as_secs());
                    self.publish(
                        &master,
                        FlowEventKind::PhaseFailed {
                            phase,
                            error: detail.clone(),
                        },
                    );
                    self.fail_phase(&master, &mut child, &machine, &detail, "timeout")
                        .await?;
                    return Ok(());
                }
            }
        }
    }

    /// CAS the lifecycle with one re-read retry. Returns `None` when the
    /// flow moved to a state that invalidates the runner's write.
    async fn try_set_lifecycle(
        &self,
        master: &MasterFlowRecord,
        to: LifecycleStatus,
        reason: Option<&str>,
    ) -> Result<Option<MasterFlowRecord>> {
        let mut current = master.clone();
        for _ in 0..2 {
            // The guard runs before every attempt, first included: a flow
            // already paused or settled is never overwritten by a draining
            // phase result.
            if !matches!(
                current.lifecycle_status,
                LifecycleStatus::Initialized | LifecycleStatus::Running
            ) {
                debug!(
                    status = %current.lifecycle_status,
                    "Lifecycle moved concurrently, runner write dropped"
                );
                return Ok(None);
            }
            match self
                .store
                .update_lifecycle(current.id, current.version, to, reason)
                .await
            {
                Ok(updated) => return Ok(Some(updated)),
                Err(StoreError::VersionConflict { .. }) => {
                    current = self.store.get_master(current.id).await?;
                }
                Err(error) => return Err(error.into()),
            }
        }
        Ok(None)
    }

    async fn complete_flow(&self, master: &MasterFlowRecord) -> Result<()> {
        let fresh = self.store.get_master(master.id).await?;
        if let Some(updated) = self
            .try_set_lifecycle(&fresh, LifecycleStatus::Completed, None)
            .await?
        {
            self.publish(&updated, FlowEventKind::FlowCompleted);
            info!("Flow completed");
        }
        Ok(())
    }

    async fn fail_phase(
        &self,
        master: &MasterFlowRecord,
        child: &mut ChildFlowRecord,
        machine: &PhaseStateMachine,
        detail: &str,
        reason: &str,
    ) -> Result<()> {
        let phase = child.current_phase;
        let transition =
            machine.apply(&child.phase_progress, phase, &FlowEvent::fail_with_error(detail))?;
        child.phase_progress = transition.progress;
        *child = self.save_child_with_retry(child).await?;

        let retryable = matches!(
            transition.disposition,
            FlowDisposition::Failed { retryable: true }
        );
        let fresh = self.store.get_master(master.id).await?;
        if let Some(updated) = self
            .try_set_lifecycle(&fresh, LifecycleStatus::Failed, Some(reason))
            .await?
        {
            self.publish(
                &updated,
                FlowEventKind::FlowFailed {
                    reason: detail.to_string(),
                },
            );
        }
        warn!(phase = %phase, error = %detail, retryable, "Phase failed");
        Ok(())
    }

    /// Mark the flow failed after an unrecoverable storage error, so it does
    /// not sit in `running` with no executor until the health monitor finds
    /// it. A deleted flow is left alone.
    async fn record_abort(&self, master_flow_id: Uuid) {
        match self.store.get_master(master_flow_id).await {
            Ok(master)
                if matches!(
                    master.lifecycle_status,
                    LifecycleStatus::Initialized | LifecycleStatus::Running
                ) =>
            {
                match self
                    .try_set_lifecycle(&master, LifecycleStatus::Failed, Some("persistence_error"))
                    .await
                {
                    Ok(Some(updated)) => self.publish(
                        &updated,
                        FlowEventKind::FlowFailed {
                            reason: "persistence_error".to_string(),
                        },
                    ),
                    Ok(None) => {}
                    Err(error) => error!(error = %error, "Could not record flow failure"),
                }
            }
            Ok(_) => {}
            Err(StoreError::MasterNotFound { .. }) => {
                debug!("Flow deleted while executing, nothing to record");
            }
            Err(error) => error!(error = %error, "Could not load flow to record failure"),
        }
    }

    /// Persist the child row, retrying transient database errors with a
    /// short backoff before giving up.
    async fn save_child_with_retry(&self, child: &ChildFlowRecord) -> Result<ChildFlowRecord> {
        let mut attempt = 0;
        loop {
            match self.store.save_child(child).await {
                Ok(saved) => return Ok(saved),
                Err(StoreError::Database { .. }) if attempt + 1 < self.config.persist_attempts => {
                    attempt += 1;
                    warn!(attempt, "Child save failed, retrying");
                    tokio::time::sleep(self.config.persist_backoff()).await;
                }
                Err(error) => return Err(error.into()),
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ExecutionLease, FlowArtifact, NewChildFlow, NewFlowArtifact, NewMasterFlow,
        StuckFlowCandidate,
    };
    use crate::registry::{PhaseError, PhaseOutcome};
    use crate::store::{DeletedRecords, InMemoryFlowRecordStore, StoreResult};
    use crate::workflow::{PhaseDefinition, PhaseName, WorkflowType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    struct Harness {
        store: Arc<InMemoryFlowRecordStore>,
        handlers: Arc<PhaseHandlerRegistry>,
        executions: Arc<ExecutionRegistry>,
        runner: FlowRunner,
    }

    fn harness(config: ExecutionConfig) -> Harness {
        let store: Arc<InMemoryFlowRecordStore> = Arc::new(InMemoryFlowRecordStore::new());
        let handlers = Arc::new(PhaseHandlerRegistry::new());
        let executions = Arc::new(ExecutionRegistry::new());
        let runner = FlowRunner::new(
            store.clone(),
            handlers.clone(),
            executions.clone(),
            EventPublisher::default(),
            config,
        );
        Harness {
            store,
            handlers,
            executions,
            runner,
        }
    }

    fn test_config() -> ExecutionConfig {
        ExecutionConfig {
            lease_ttl_secs: 5,
            heartbeat_interval_secs: 1,
            default_phase_timeout_secs: 2,
            persist_attempts: 2,
            persist_backoff_ms: 10,
        }
    }

    async fn create_discovery_flow(store: &InMemoryFlowRecordStore) -> Uuid {
        let definition = PhaseDefinition::for_workflow(WorkflowType::Discovery);
        let (master, _) = store
            .create_flow(
                NewMasterFlow::new("acme", "prod", WorkflowType::Discovery),
                NewChildFlow::for_definition(
                    &definition,
                    vec!["app-1".to_string()],
                    serde_json::json!({"entities": 1}),
                ),
            )
            .await
            .unwrap();
        master.id
    }

    fn register_passing_handlers(handlers: &PhaseHandlerRegistry) {
        for phase in [
            PhaseName::Planning,
            PhaseName::SourceScan,
            PhaseName::DependencyAnalysis,
            PhaseName::DataMigration,
        ] {
            handlers.register_fn(WorkflowType::Discovery, phase, move |ctx| async move {
                Ok(PhaseOutcome::with_state(ctx.runtime_state).metric("phases_run", 1))
            });
        }
    }

    async fn wait_for_terminal(
        store: &InMemoryFlowRecordStore,
        master_flow_id: Uuid,
    ) -> MasterFlowRecord {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let master = store.get_master(master_flow_id).await.unwrap();
                if master.lifecycle_status.is_terminal() {
                    return master;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("flow did not reach a terminal state in time")
    }

    #[tokio::test]
    async fn test_runs_all_phases_to_completion() {
        let h = harness(test_config());
        register_passing_handlers(&h.handlers);
        let flow_id = create_discovery_flow(&h.store).await;

        assert!(h.runner.spawn(flow_id).await.unwrap());

        let master = wait_for_terminal(&h.store, flow_id).await;
        assert_eq!(master.lifecycle_status, LifecycleStatus::Completed);

        let child = h.store.get_child(flow_id).await.unwrap();
        assert_eq!(child.phase_progress.completed_count(), 4);
        assert_eq!(child.metrics.get("phases_run"), 4);
        assert_eq!(child.current_phase, PhaseName::DataMigration);

        // Lease released and local registration cleared.
        tokio::time::timeout(Duration::from_secs(2), async {
            while h.executions.is_executing(flow_id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(h.store.find_lease(flow_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_handler_failure_marks_flow_failed() {
        let h = harness(test_config());
        h.handlers.register_fn(
            WorkflowType::Discovery,
            PhaseName::Planning,
            |ctx| async move { Ok(PhaseOutcome::with_state(ctx.runtime_state)) },
        );
        h.handlers.register_fn(
            WorkflowType::Discovery,
            PhaseName::SourceScan,
            |_ctx| async move {
                Err::<PhaseOutcome, _>(PhaseError::new("scan endpoint unreachable"))
            },
        );
        let flow_id = create_discovery_flow(&h.store).await;

        h.runner.spawn(flow_id).await.unwrap();
        let master = wait_for_terminal(&h.store, flow_id).await;
        assert_eq!(master.lifecycle_status, LifecycleStatus::Failed);
        assert_eq!(master.status_reason.as_deref(), Some("phase_failed"));

        let child = h.store.get_child(flow_id).await.unwrap();
        assert_eq!(child.current_phase, PhaseName::SourceScan);
        let entry = child.phase_progress.entry(PhaseName::SourceScan).unwrap();
        assert!(entry.status.is_failed());
        assert_eq!(entry.error.as_deref(), Some("scan endpoint unreachable"));
    }

    #[tokio::test]
    async fn test_missing_handler_fails_flow() {
        let h = harness(test_config());
        // Only planning registered; source_scan resolution fails.
        h.handlers.register_fn(
            WorkflowType::Discovery,
            PhaseName::Planning,
            |ctx| async move { Ok(PhaseOutcome::with_state(ctx.runtime_state)) },
        );
        let flow_id = create_discovery_flow(&h.store).await;

        h.runner.spawn(flow_id).await.unwrap();
        let master = wait_for_terminal(&h.store, flow_id).await;
        assert_eq!(master.lifecycle_status, LifecycleStatus::Failed);
        assert_eq!(master.status_reason.as_deref(), Some("handler_missing"));
    }

    #[tokio::test]
    async fn test_phase_timeout_fails_flow() {
        let mut config = test_config();
        config.default_phase_timeout_secs = 1;
        let h = harness(config);
        h.handlers.register_fn(
            WorkflowType::Discovery,
            PhaseName::Planning,
            |ctx| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(PhaseOutcome::with_state(ctx.runtime_state))
            },
        );
        let flow_id = create_discovery_flow(&h.store).await;

        h.runner.spawn(flow_id).await.unwrap();
        let master = wait_for_terminal(&h.store, flow_id).await;
        assert_eq!(master.lifecycle_status, LifecycleStatus::Failed);
        assert_eq!(master.status_reason.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_spawn_is_idempotent_per_process() {
        let h = harness(test_config());
        register_passing_handlers(&h.handlers);
        h.handlers.register_fn(
            WorkflowType::Discovery,
            PhaseName::Planning,
            |ctx| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(PhaseOutcome::with_state(ctx.runtime_state))
            },
        );
        let flow_id = create_discovery_flow(&h.store).await;

        assert!(h.runner.spawn(flow_id).await.unwrap());
        // Second spawn while the first still runs is a local no-op.
        assert!(!h.runner.spawn(flow_id).await.unwrap());
        wait_for_terminal(&h.store, flow_id).await;
    }

    #[tokio::test]
    async fn test_spawn_rejects_foreign_live_lease() {
        let h = harness(test_config());
        register_passing_handlers(&h.handlers);
        let flow_id = create_discovery_flow(&h.store).await;

        // Another process holds the lease.
        h.store
            .try_acquire_lease(flow_id, "other-process", chrono::Duration::seconds(30))
            .await
            .unwrap();

        let err = h.runner.spawn(flow_id).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::FlowExecuting { master_flow_id } if master_flow_id == flow_id
        ));
        assert!(!h.executions.is_executing(flow_id));
    }

    #[tokio::test]
    async fn test_stop_request_halts_at_phase_boundary() {
        let h = harness(test_config());
        let store = h.store.clone();
        register_passing_handlers(&h.handlers);
        // Planning takes long enough for the stop to land mid-phase.
        h.handlers.register_fn(
            WorkflowType::Discovery,
            PhaseName::Planning,
            |ctx| async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(PhaseOutcome::with_state(ctx.runtime_state).metric("planning_done", 1))
            },
        );
        let flow_id = create_discovery_flow(&store).await;

        h.runner.spawn(flow_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(h.executions.request_stop(flow_id));

        // Runner exits after the in-flight phase completes; no later phase
        // starts and the flow stays running for the coordinator to settle.
        tokio::time::timeout(Duration::from_secs(3), async {
            while h.executions.is_executing(flow_id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let child = store.get_child(flow_id).await.unwrap();
        assert_eq!(child.metrics.get("planning_done"), 1);
        assert_eq!(child.current_phase, PhaseName::SourceScan);
        let master = store.get_master(flow_id).await.unwrap();
        assert_eq!(master.lifecycle_status, LifecycleStatus::Running);
    }

    /// Flips the flow's lifecycle from inside a handler, so the write is
    /// ordered strictly before the runner's own post-phase bookkeeping.
    async fn settle_mid_phase(
        store: &InMemoryFlowRecordStore,
        master_flow_id: Uuid,
        to: LifecycleStatus,
        reason: Option<&str>,
    ) {
        let master = store.get_master(master_flow_id).await.unwrap();
        store
            .update_lifecycle(master_flow_id, master.version, to, reason)
            .await
            .unwrap();
    }

    async fn wait_for_runner_exit(executions: &ExecutionRegistry, master_flow_id: Uuid) {
        tokio::time::timeout(Duration::from_secs(3), async {
            while executions.is_executing(master_flow_id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("runner did not exit in time")
    }

    #[tokio::test]
    async fn test_cancelled_flow_is_not_overwritten_by_phase_failure() {
        let h = harness(test_config());
        register_passing_handlers(&h.handlers);
        let store = h.store.clone();
        // The flow is cancelled while source_scan is in flight, then the
        // phase fails. The failure must not displace the cancellation.
        h.handlers.register_fn(
            WorkflowType::Discovery,
            PhaseName::SourceScan,
            move |ctx| {
                let store = store.clone();
                async move {
                    settle_mid_phase(
                        &store,
                        ctx.master_flow_id,
                        LifecycleStatus::Cancelled,
                        Some("user_cancelled"),
                    )
                    .await;
                    Err::<PhaseOutcome, _>(PhaseError::new("scan endpoint unreachable"))
                }
            },
        );
        let flow_id = create_discovery_flow(&h.store).await;

        h.runner.spawn(flow_id).await.unwrap();
        wait_for_runner_exit(&h.executions, flow_id).await;

        let master = h.store.get_master(flow_id).await.unwrap();
        assert_eq!(master.lifecycle_status, LifecycleStatus::Cancelled);
        assert_eq!(master.status_reason.as_deref(), Some("user_cancelled"));

        // The phase outcome is still recorded on the child.
        let child = h.store.get_child(flow_id).await.unwrap();
        let entry = child.phase_progress.entry(PhaseName::SourceScan).unwrap();
        assert!(entry.status.is_failed());
        assert!(h.store.find_lease(flow_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_flow_is_not_overwritten_by_final_phase_success() {
        let h = harness(test_config());
        register_passing_handlers(&h.handlers);
        let store = h.store.clone();
        // Cancellation lands while the last phase is in flight and the
        // phase then succeeds. The flow must stay cancelled, not complete.
        h.handlers.register_fn(
            WorkflowType::Discovery,
            PhaseName::DataMigration,
            move |ctx| {
                let store = store.clone();
                async move {
                    settle_mid_phase(
                        &store,
                        ctx.master_flow_id,
                        LifecycleStatus::Cancelled,
                        Some("user_cancelled"),
                    )
                    .await;
                    Ok(PhaseOutcome::with_state(ctx.runtime_state))
                }
            },
        );
        let flow_id = create_discovery_flow(&h.store).await;

        h.runner.spawn(flow_id).await.unwrap();
        wait_for_runner_exit(&h.executions, flow_id).await;

        let master = h.store.get_master(flow_id).await.unwrap();
        assert_eq!(master.lifecycle_status, LifecycleStatus::Cancelled);
        assert_eq!(master.status_reason.as_deref(), Some("user_cancelled"));

        // Finished work is not rolled back; only the lifecycle is preserved.
        let child = h.store.get_child(flow_id).await.unwrap();
        assert_eq!(child.phase_progress.completed_count(), 4);
    }

    #[tokio::test]
    async fn test_paused_flow_is_not_overwritten_by_phase_failure() {
        let h = harness(test_config());
        register_passing_handlers(&h.handlers);
        let store = h.store.clone();
        h.handlers.register_fn(
            WorkflowType::Discovery,
            PhaseName::SourceScan,
            move |ctx| {
                let store = store.clone();
                async move {
                    settle_mid_phase(&store, ctx.master_flow_id, LifecycleStatus::Paused, None)
                        .await;
                    Err::<PhaseOutcome, _>(PhaseError::new("scan endpoint unreachable"))
                }
            },
        );
        let flow_id = create_discovery_flow(&h.store).await;

        h.runner.spawn(flow_id).await.unwrap();
        wait_for_runner_exit(&h.executions, flow_id).await;

        let master = h.store.get_master(flow_id).await.unwrap();
        assert_eq!(master.lifecycle_status, LifecycleStatus::Paused);
        assert_eq!(master.status_reason, None);
        // The failed attempt is recorded; a resume can retry the phase.
        let child = h.store.get_child(flow_id).await.unwrap();
        let entry = child.phase_progress.entry(PhaseName::SourceScan).unwrap();
        assert!(entry.status.is_failed());
    }

    /// Delegating store that fails child saves on demand, for exercising the
    /// bounded persistence retry.
    struct SaveFailingStore {
        inner: InMemoryFlowRecordStore,
        fail_saves: AtomicBool,
        save_attempts: AtomicU32,
    }

    impl SaveFailingStore {
        fn new() -> Self {
            Self {
                inner: InMemoryFlowRecordStore::new(),
                fail_saves: AtomicBool::new(false),
                save_attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl FlowRecordStore for SaveFailingStore {
        async fn create_flow(
            &self,
            master: NewMasterFlow,
            child: NewChildFlow,
        ) -> StoreResult<(MasterFlowRecord, ChildFlowRecord)> {
            self.inner.create_flow(master, child).await
        }

        async fn get_master(&self, master_flow_id: Uuid) -> StoreResult<MasterFlowRecord> {
            self.inner.get_master(master_flow_id).await
        }

        async fn get_child(&self, master_flow_id: Uuid) -> StoreResult<ChildFlowRecord> {
            self.inner.get_child(master_flow_id).await
        }

        async fn find_active(
            &self,
            tenant_id: &str,
            scope_id: &str,
            workflow_type: WorkflowType,
        ) -> StoreResult<Option<MasterFlowRecord>> {
            self.inner
                .find_active(tenant_id, scope_id, workflow_type)
                .await
        }

        async fn list_flows(
            &self,
            tenant_id: &str,
            scope_id: &str,
        ) -> StoreResult<Vec<MasterFlowRecord>> {
            self.inner.list_flows(tenant_id, scope_id).await
        }

        async fn update_lifecycle(
            &self,
            master_flow_id: Uuid,
            expected_version: i64,
            status: LifecycleStatus,
            status_reason: Option<&str>,
        ) -> StoreResult<MasterFlowRecord> {
            self.inner
                .update_lifecycle(master_flow_id, expected_version, status, status_reason)
                .await
        }

        async fn save_child(&self, child: &ChildFlowRecord) -> StoreResult<ChildFlowRecord> {
            if self.fail_saves.load(Ordering::SeqCst) {
                self.save_attempts.fetch_add(1, Ordering::SeqCst);
                return Err(StoreError::Database {
                    operation: "save_child".to_string(),
                    reason: "injected write failure".to_string(),
                });
            }
            self.inner.save_child(child).await
        }

        async fn touch_master(&self, master_flow_id: Uuid) -> StoreResult<()> {
            self.inner.touch_master(master_flow_id).await
        }

        async fn stale_active_flows(
            &self,
            stale_for: chrono::Duration,
            limit: i64,
        ) -> StoreResult<Vec<StuckFlowCandidate>> {
            self.inner.stale_active_flows(stale_for, limit).await
        }

        async fn delete_flow(&self, master_flow_id: Uuid) -> StoreResult<DeletedRecords> {
            self.inner.delete_flow(master_flow_id).await
        }

        async fn insert_artifact(
            &self,
            master_flow_id: Uuid,
            artifact: NewFlowArtifact,
        ) -> StoreResult<FlowArtifact> {
            self.inner.insert_artifact(master_flow_id, artifact).await
        }

        async fn list_artifacts(&self, master_flow_id: Uuid) -> StoreResult<Vec<FlowArtifact>> {
            self.inner.list_artifacts(master_flow_id).await
        }

        async fn try_acquire_lease(
            &self,
            master_flow_id: Uuid,
            holder_id: &str,
            ttl: chrono::Duration,
        ) -> StoreResult<Option<ExecutionLease>> {
            self.inner
                .try_acquire_lease(master_flow_id, holder_id, ttl)
                .await
        }

        async fn renew_lease(
            &self,
            master_flow_id: Uuid,
            holder_id: &str,
            ttl: chrono::Duration,
        ) -> StoreResult<bool> {
            self.inner.renew_lease(master_flow_id, holder_id, ttl).await
        }

        async fn release_lease(&self, master_flow_id: Uuid, holder_id: &str) -> StoreResult<()> {
            self.inner.release_lease(master_flow_id, holder_id).await
        }

        async fn find_lease(&self, master_flow_id: Uuid) -> StoreResult<Option<ExecutionLease>> {
            self.inner.find_lease(master_flow_id).await
        }

        async fn reap_expired_leases(&self) -> StoreResult<u64> {
            self.inner.reap_expired_leases().await
        }

        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn test_persistence_retry_exhaustion_fails_flow() {
        let store = Arc::new(SaveFailingStore::new());
        let handlers = Arc::new(PhaseHandlerRegistry::new());
        let executions = Arc::new(ExecutionRegistry::new());
        let runner = FlowRunner::new(
            store.clone(),
            handlers.clone(),
            executions.clone(),
            EventPublisher::default(),
            test_config(),
        );
        register_passing_handlers(&handlers);
        let flow_id = create_discovery_flow(&store.inner).await;
        store.fail_saves.store(true, Ordering::SeqCst);

        runner.spawn(flow_id).await.unwrap();
        let master = wait_for_terminal(&store.inner, flow_id).await;
        assert_eq!(master.lifecycle_status, LifecycleStatus::Failed);
        assert_eq!(master.status_reason.as_deref(), Some("persistence_error"));
        // Both configured attempts were spent before giving up.
        assert_eq!(store.save_attempts.load(Ordering::SeqCst), 2);
        assert!(!executions.is_executing(flow_id));
        assert!(store.inner.find_lease(flow_id).await.unwrap().is_none());
    }
}
