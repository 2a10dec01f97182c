//! Shared harness for integration tests: a full in-memory orchestration
//! stack with scripted phase handlers and polling helpers.

#![allow(dead_code)]

pub mod strategies;

use migflow_core::config::MigflowConfig;
use migflow_core::events::EventPublisher;
use migflow_core::models::MasterFlowRecord;
use migflow_core::orchestration::{
    ExecutionRegistry, FlowHealthMonitor, FlowRunner, InitializeRequest, OrchestrationCoordinator,
};
use migflow_core::registry::{PhaseError, PhaseHandlerRegistry, PhaseOutcome};
use migflow_core::state_machine::LifecycleStatus;
use migflow_core::store::{FlowRecordStore, InMemoryFlowRecordStore};
use migflow_core::web::state::AppState;
use migflow_core::workflow::{PhaseDefinition, PhaseName, WorkflowType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Fully wired orchestration stack over the in-memory store.
pub struct TestEnv {
    pub config: MigflowConfig,
    pub store: Arc<InMemoryFlowRecordStore>,
    pub handlers: Arc<PhaseHandlerRegistry>,
    pub executions: Arc<ExecutionRegistry>,
    pub events: EventPublisher,
    pub coordinator: Arc<OrchestrationCoordinator>,
    pub monitor: Arc<FlowHealthMonitor>,
}

impl TestEnv {
    pub fn new() -> Self {
        let config = MigflowConfig::for_testing();
        let store = Arc::new(InMemoryFlowRecordStore::new());
        let handlers = Arc::new(PhaseHandlerRegistry::new());
        let executions = Arc::new(ExecutionRegistry::new());
        let events = EventPublisher::default();
        let runner = FlowRunner::new(
            store.clone(),
            handlers.clone(),
            executions.clone(),
            events.clone(),
            config.execution.clone(),
        );
        let coordinator = Arc::new(OrchestrationCoordinator::new(
            store.clone(),
            runner,
            executions.clone(),
            events.clone(),
        ));
        let monitor = Arc::new(FlowHealthMonitor::new(
            store.clone(),
            executions.clone(),
            events.clone(),
            config.health.clone(),
        ));
        Self {
            config,
            store,
            handlers,
            executions,
            events,
            coordinator,
            monitor,
        }
    }

    /// Axum router over this environment, for HTTP-level tests.
    pub fn app(&self) -> axum::Router {
        let state = AppState::new(
            self.coordinator.clone(),
            self.store.clone(),
            self.monitor.clone(),
        );
        migflow_core::web::create_app(state, &self.config.web)
    }

    /// Register a fast passing handler for every phase of `workflow_type`.
    /// Each invocation stamps the runtime state and bumps a counter.
    pub fn register_passing_handlers(&self, workflow_type: WorkflowType) {
        let definition = PhaseDefinition::for_workflow(workflow_type);
        for spec in definition.phases() {
            let phase = spec.name;
            self.handlers
                .register_fn(workflow_type, phase, move |ctx| async move {
                    let mut state = ctx.runtime_state;
                    if let Some(object) = state.as_object_mut() {
                        object.insert(format!("{phase}_done"), serde_json::Value::Bool(true));
                    }
                    Ok(PhaseOutcome::with_state(state).metric("phases_run", 1))
                });
        }
    }

    /// Replace one phase's handler with an unconditional failure.
    pub fn register_failing_handler(
        &self,
        workflow_type: WorkflowType,
        phase: PhaseName,
        message: &str,
    ) {
        let message = message.to_string();
        self.handlers.register_fn(workflow_type, phase, move |_ctx| {
            let message = message.clone();
            async move { Err(PhaseError::new(message)) }
        });
    }

    /// Replace one phase's handler with a sleep-then-succeed handler, for
    /// pause and cancel windows.
    pub fn register_slow_handler(
        &self,
        workflow_type: WorkflowType,
        phase: PhaseName,
        delay: Duration,
    ) {
        self.handlers
            .register_fn(workflow_type, phase, move |ctx| async move {
                tokio::time::sleep(delay).await;
                Ok(PhaseOutcome::with_state(ctx.runtime_state).metric("phases_run", 1))
            });
    }

    /// Replace one phase's handler with one that fails on its first
    /// invocation and passes afterwards. Returns the shared flag so tests
    /// can observe whether the failure fired.
    pub fn register_flaky_handler(
        &self,
        workflow_type: WorkflowType,
        phase: PhaseName,
    ) -> Arc<AtomicBool> {
        let failed_once = Arc::new(AtomicBool::new(false));
        let flag = failed_once.clone();
        self.handlers.register_fn(workflow_type, phase, move |ctx| {
            let flag = flag.clone();
            async move {
                if !flag.swap(true, Ordering::SeqCst) {
                    Err(PhaseError::new("transient backend failure"))
                } else {
                    Ok(PhaseOutcome::with_state(ctx.runtime_state).metric("phases_run", 1))
                }
            }
        });
        failed_once
    }

    /// Poll until the flow reaches `status`, panicking on timeout.
    pub async fn wait_for_status(
        &self,
        master_flow_id: Uuid,
        status: LifecycleStatus,
        timeout: Duration,
    ) -> MasterFlowRecord {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let master = self.store.get_master(master_flow_id).await.unwrap();
            if master.lifecycle_status == status {
                return master;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "flow {master_flow_id} is {} while waiting for {status}",
                master.lifecycle_status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll until the flow reaches any terminal status.
    pub async fn wait_until_terminal(
        &self,
        master_flow_id: Uuid,
        timeout: Duration,
    ) -> MasterFlowRecord {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let master = self.store.get_master(master_flow_id).await.unwrap();
            if master.lifecycle_status.is_terminal() {
                return master;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "flow {master_flow_id} still {} after {timeout:?}",
                master.lifecycle_status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll until the flow's cursor sits on `phase`.
    pub async fn wait_for_phase(&self, master_flow_id: Uuid, phase: PhaseName, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let child = self.store.get_child(master_flow_id).await.unwrap();
            if child.current_phase == phase {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "flow {master_flow_id} sits on {} while waiting for {phase}",
                child.current_phase
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll until no local runner and no live lease remain for the flow.
    pub async fn wait_until_idle(&self, master_flow_id: Uuid, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let leased = self
                .store
                .find_lease(master_flow_id)
                .await
                .unwrap()
                .map(|lease| lease.is_live(chrono::Utc::now()))
                .unwrap_or(false);
            if !self.executions.is_executing(master_flow_id) && !leased {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "flow {master_flow_id} still executing after {timeout:?}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize request with harness defaults for tenant and scope.
pub fn initialize_request(workflow_type: WorkflowType) -> InitializeRequest {
    initialize_request_for("acme", "prod", workflow_type)
}

pub fn initialize_request_for(
    tenant_id: &str,
    scope_id: &str,
    workflow_type: WorkflowType,
) -> InitializeRequest {
    InitializeRequest {
        tenant_id: tenant_id.to_string(),
        scope_id: scope_id.to_string(),
        workflow_type,
        selected_entity_ids: vec!["vm-1".to_string(), "vm-2".to_string()],
        input: Some(serde_json::json!({"region": "eu-west-1"})),
    }
}
