//! Workflow type and phase definitions.
//!
//! Phase identity is a closed enum: every phase a workflow type can visit is
//! declared here, and the per-type ordering is fixed at definition time. The
//! orchestration layer never invents or reorders phases at runtime.

pub mod phases;
pub mod types;

pub use phases::{PhaseDefinition, PhaseName, PhaseSpec};
pub use types::WorkflowType;
