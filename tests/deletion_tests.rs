//! Cascading deletion through the coordinator: receipts, the force
//! override for executing flows, and slot reuse after removal.

mod common;

use common::{initialize_request, TestEnv};
use migflow_core::error::OrchestrationError;
use migflow_core::events::FlowEventKind;
use migflow_core::registry::PhaseOutcome;
use migflow_core::state_machine::LifecycleStatus;
use migflow_core::workflow::{PhaseName, WorkflowType};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_delete_completed_flow_removes_all_records() {
    let env = TestEnv::new();
    env.register_passing_handlers(WorkflowType::Discovery);
    env.handlers.register_fn(
        WorkflowType::Discovery,
        PhaseName::SourceScan,
        |ctx| async move {
            Ok(PhaseOutcome::with_state(ctx.runtime_state)
                .artifact("scan_summary", serde_json::json!({"entities": 12})))
        },
    );

    let created = env
        .coordinator
        .initialize(initialize_request(WorkflowType::Discovery))
        .await
        .unwrap();
    env.wait_for_status(created.master_flow_id, LifecycleStatus::Completed, WAIT)
        .await;
    env.wait_until_idle(created.master_flow_id, WAIT).await;

    let artifacts = env.coordinator.artifacts(created.master_flow_id).await.unwrap();
    assert_eq!(artifacts.len(), 1);
    let mut receiver = env.events.subscribe();

    let receipt = env
        .coordinator
        .delete(created.master_flow_id, "tester", false)
        .await
        .unwrap();
    assert_eq!(receipt.master_flow_id, created.master_flow_id);
    assert!(!receipt.interrupted_execution);
    // One artifact, the child, and the master, dependents first.
    assert_eq!(receipt.deleted_ids.len(), 3);
    assert!(receipt.deleted_ids.contains(&artifacts[0].id));
    assert!(receipt.deleted_ids.contains(&created.child_flow_id));
    assert_eq!(receipt.deleted_ids.last(), Some(&created.master_flow_id));

    assert_eq!(receiver.try_recv().unwrap().kind, FlowEventKind::FlowDeleted);
    assert!(matches!(
        env.coordinator.status(created.master_flow_id).await,
        Err(OrchestrationError::NotFound { .. })
    ));
    assert!(matches!(
        env.coordinator.artifacts(created.master_flow_id).await,
        Err(OrchestrationError::NotFound { .. })
    ));
    assert_eq!(env.store.flow_count(), 0);
}

#[tokio::test]
async fn test_delete_paused_flow_needs_no_force() {
    let env = TestEnv::new();
    env.register_passing_handlers(WorkflowType::Collection);
    env.register_slow_handler(
        WorkflowType::Collection,
        PhaseName::Extraction,
        Duration::from_millis(400),
    );

    let created = env
        .coordinator
        .initialize(initialize_request(WorkflowType::Collection))
        .await
        .unwrap();
    env.wait_for_status(created.master_flow_id, LifecycleStatus::Running, WAIT)
        .await;
    env.coordinator.pause(created.master_flow_id).await.unwrap();
    env.wait_until_idle(created.master_flow_id, WAIT).await;

    let receipt = env
        .coordinator
        .delete(created.master_flow_id, "tester", false)
        .await
        .unwrap();
    assert!(!receipt.interrupted_execution);
    assert_eq!(env.store.flow_count(), 0);
}

#[tokio::test]
async fn test_delete_executing_flow_requires_force() {
    let env = TestEnv::new();
    env.register_passing_handlers(WorkflowType::Discovery);
    env.register_slow_handler(
        WorkflowType::Discovery,
        PhaseName::SourceScan,
        Duration::from_millis(800),
    );

    let created = env
        .coordinator
        .initialize(initialize_request(WorkflowType::Discovery))
        .await
        .unwrap();
    env.wait_for_status(created.master_flow_id, LifecycleStatus::Running, WAIT)
        .await;

    let err = env
        .coordinator
        .delete(created.master_flow_id, "tester", false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::FlowExecuting { master_flow_id } if master_flow_id == created.master_flow_id
    ));
    assert!(env.coordinator.status(created.master_flow_id).await.is_ok());

    let receipt = env
        .coordinator
        .delete(created.master_flow_id, "tester", true)
        .await
        .unwrap();
    assert!(receipt.interrupted_execution);
    assert!(matches!(
        env.coordinator.status(created.master_flow_id).await,
        Err(OrchestrationError::NotFound { .. })
    ));

    // The interrupted runner finds its records gone, gives up, and
    // deregisters without recreating anything.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(env.store.flow_count(), 0);
    assert!(!env.executions.is_executing(created.master_flow_id));
}

#[tokio::test]
async fn test_deleted_slot_is_immediately_reusable() {
    let env = TestEnv::new();
    env.register_passing_handlers(WorkflowType::Assessment);
    env.register_slow_handler(
        WorkflowType::Assessment,
        PhaseName::FieldMapping,
        Duration::from_millis(800),
    );

    let first = env
        .coordinator
        .initialize(initialize_request(WorkflowType::Assessment))
        .await
        .unwrap();
    env.wait_for_status(first.master_flow_id, LifecycleStatus::Running, WAIT)
        .await;
    env.coordinator
        .delete(first.master_flow_id, "tester", true)
        .await
        .unwrap();

    let second = env
        .coordinator
        .initialize(initialize_request(WorkflowType::Assessment))
        .await
        .unwrap();
    assert_ne!(second.master_flow_id, first.master_flow_id);
}
