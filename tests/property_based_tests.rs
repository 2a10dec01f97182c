//! Property tests for the phase ordering rules and the shape of freshly
//! created records, driven by the strategies in `common::strategies`.

mod common;

use chrono::Utc;
use common::strategies::{
    cursor_pair_strategy, runtime_state_strategy, tenant_id_strategy, typed_phase_strategy,
    workflow_type_strategy,
};
use migflow_core::models::{NewChildFlow, NewMasterFlow, PhaseProgress};
use migflow_core::state_machine::{
    FlowDisposition, FlowEvent, LifecycleStatus, PhaseStateMachine, PhaseStatus, TransitionError,
};
use migflow_core::store::{FlowRecordStore, InMemoryFlowRecordStore};
use migflow_core::workflow::PhaseDefinition;
use proptest::prelude::*;

proptest! {
    /// A run of successes visits every phase in definition order, stays
    /// consistent at each step, and reports `Completed` exactly once, at
    /// the final phase.
    #[test]
    fn prop_successes_walk_the_definition_in_order(workflow_type in workflow_type_strategy()) {
        let definition = PhaseDefinition::for_workflow(workflow_type);
        let machine = PhaseStateMachine::new(definition.clone());
        let mut progress = PhaseProgress::for_definition(&definition);
        let mut current = definition.first_phase();

        for (idx, spec) in definition.phases().iter().enumerate() {
            prop_assert_eq!(current, spec.name);
            let outcome = machine
                .apply(&progress, current, &FlowEvent::PhaseSucceeded)
                .unwrap();
            if idx + 1 == definition.len() {
                prop_assert_eq!(outcome.disposition, FlowDisposition::Completed);
            } else {
                prop_assert_eq!(outcome.disposition, FlowDisposition::Continue);
            }
            progress = outcome.progress;
            current = outcome.current_phase;
            prop_assert!(progress.is_consistent_with(&definition, current));
        }
        prop_assert_eq!(progress.completed_count(), definition.len());
    }

    /// A failure's disposition always matches the retryability declared in
    /// the definition, and the failing entry records the error.
    #[test]
    fn prop_failure_retryability_follows_the_definition(
        (workflow_type, phase) in typed_phase_strategy()
    ) {
        let definition = PhaseDefinition::for_workflow(workflow_type);
        let machine = PhaseStateMachine::new(definition.clone());
        let progress = PhaseProgress::for_definition(&definition);

        let outcome = machine
            .apply(&progress, phase, &FlowEvent::fail_with_error("backend offline"))
            .unwrap();
        prop_assert_eq!(
            outcome.disposition,
            FlowDisposition::Failed { retryable: definition.is_retryable(phase) }
        );
        prop_assert_eq!(outcome.current_phase, phase);
        let entry = outcome.progress.entry(phase).unwrap();
        prop_assert_eq!(entry.status, PhaseStatus::Failed);
        prop_assert_eq!(entry.error.as_deref(), Some("backend offline"));
    }

    /// Rewinding to any position at or before the cursor resets exactly the
    /// target and everything after it; any position past the cursor is
    /// rejected.
    #[test]
    fn prop_rewind_never_moves_forward(
        (workflow_type, current_idx, target_idx) in cursor_pair_strategy()
    ) {
        let definition = PhaseDefinition::for_workflow(workflow_type);
        let machine = PhaseStateMachine::new(definition.clone());
        let current = definition.phases()[current_idx].name;
        let target = definition.phases()[target_idx].name;

        // Progress as the runner would leave it: everything before the
        // cursor completed, the rest untouched.
        let mut progress = PhaseProgress::for_definition(&definition);
        let now = Utc::now();
        for spec in &definition.phases()[..current_idx] {
            progress.mark_completed(spec.name, now);
        }

        match machine.rewind(&progress, current, target) {
            Ok(outcome) => {
                prop_assert!(target_idx <= current_idx);
                prop_assert_eq!(outcome.current_phase, target);
                prop_assert_eq!(outcome.disposition, FlowDisposition::Continue);
                for (idx, spec) in definition.phases().iter().enumerate() {
                    let want = if idx < target_idx {
                        PhaseStatus::Completed
                    } else {
                        PhaseStatus::Pending
                    };
                    prop_assert_eq!(outcome.progress.status_of(spec.name), Some(want));
                }
                prop_assert!(
                    outcome.progress.is_consistent_with(&definition, outcome.current_phase)
                );
            }
            Err(TransitionError::ForwardRewind { .. }) => {
                prop_assert!(target_idx > current_idx);
            }
            Err(other) => prop_assert!(false, "unexpected rejection: {}", other),
        }
    }

    /// Freshly created flows always come out of the store in a consistent
    /// starting shape regardless of tenant, workflow type, or input.
    #[test]
    fn prop_created_flows_start_consistent(
        tenant_id in tenant_id_strategy(),
        workflow_type in workflow_type_strategy(),
        runtime_state in runtime_state_strategy(),
    ) {
        let definition = PhaseDefinition::for_workflow(workflow_type);
        let store = InMemoryFlowRecordStore::new();
        let (master, child) = tokio_test::block_on(store.create_flow(
            NewMasterFlow::new(tenant_id.clone(), "prod", workflow_type),
            NewChildFlow::for_definition(&definition, vec![], runtime_state.clone()),
        ))
        .unwrap();

        prop_assert_eq!(&master.tenant_id, &tenant_id);
        prop_assert_eq!(master.lifecycle_status, LifecycleStatus::Initialized);
        prop_assert_eq!(master.version, 1);
        prop_assert!(master.status_reason.is_none());
        prop_assert_eq!(child.master_flow_id, master.id);
        prop_assert_eq!(child.current_phase, definition.first_phase());
        prop_assert_eq!(&child.runtime_state, &runtime_state);
        prop_assert_eq!(child.phase_progress.len(), definition.len());
        prop_assert_eq!(child.completion_percentage(), 0.0);
        prop_assert!(child.phase_progress.is_consistent_with(&definition, child.current_phase));
    }
}
