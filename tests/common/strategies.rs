use migflow_core::workflow::{PhaseDefinition, PhaseName, WorkflowType};
use proptest::prelude::*;

/// Strategy for generating workflow types
pub fn workflow_type_strategy() -> impl Strategy<Value = WorkflowType> {
    prop_oneof![
        Just(WorkflowType::Discovery),
        Just(WorkflowType::Collection),
        Just(WorkflowType::Assessment),
        Just(WorkflowType::Decommission),
    ]
}

/// Strategy for generating valid tenant and scope identifiers
pub fn tenant_id_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,30}"
}

/// Strategy for generating a workflow type plus one of its own phases
pub fn typed_phase_strategy() -> impl Strategy<Value = (WorkflowType, PhaseName)> {
    workflow_type_strategy().prop_flat_map(|workflow_type| {
        let phases: Vec<PhaseName> = PhaseDefinition::for_workflow(workflow_type)
            .phases()
            .iter()
            .map(|spec| spec.name)
            .collect();
        (Just(workflow_type), prop::sample::select(phases))
    })
}

/// Strategy for generating a workflow type with two cursor positions into
/// its phase ordering
pub fn cursor_pair_strategy() -> impl Strategy<Value = (WorkflowType, usize, usize)> {
    workflow_type_strategy().prop_flat_map(|workflow_type| {
        let len = PhaseDefinition::for_workflow(workflow_type).len();
        (Just(workflow_type), 0..len, 0..len)
    })
}

/// Strategy for generating handler runtime-state payloads
pub fn runtime_state_strategy() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::json!({})),
        Just(serde_json::json!({"cursor": 3})),
        Just(serde_json::json!({"entities": ["vm-1", "vm-2"]})),
        Just(serde_json::json!({"batch": {"index": 7, "done": false}})),
    ]
}
