pub mod child_flow;
pub mod execution_lease;
pub mod flow_artifact;
pub mod master_flow;

// Re-export core models for easy access
pub use child_flow::{
    ChildFlowRecord, FlowMetrics, NewChildFlow, PhaseProgress, PhaseProgressEntry,
};
pub use execution_lease::ExecutionLease;
pub use flow_artifact::{FlowArtifact, NewFlowArtifact};
pub use master_flow::{MasterFlowRecord, NewMasterFlow, StuckFlowCandidate};
