//! # Orchestration Layer
//!
//! Control plane and execution plane for migration flows.
//!
//! ## Overview
//!
//! Five pieces cooperate, all sharing one [`FlowRecordStore`]:
//!
//! - [`OrchestrationCoordinator`]: every caller-facing operation
//!   (initialize, pause, resume, cancel, status, delete)
//! - [`FlowRunner`]: the background task that executes phases in order
//! - [`ExecutionRegistry`]: process-local map of live runner handles, the
//!   idempotent scheduling gate and the cooperative stop channel
//! - [`FlowHealthMonitor`]: periodic reclamation of flows whose executor
//!   died or wedged
//! - [`DeletionCoordinator`]: cascading removal with orphan verification
//!
//! Cross-process exclusivity comes from storage: execution leases arbitrate
//! "who runs this flow" between processes, while the registry arbitrates it
//! between tasks in one process. Lifecycle writes always go through the
//! master record's optimistic-lock version.
//!
//! [`FlowRecordStore`]: crate::store::FlowRecordStore

pub mod concurrency_guard;
pub mod coordinator;
pub mod deletion;
pub mod execution_registry;
pub mod flow_runner;
pub mod health_monitor;

pub use concurrency_guard::{Admission, ConcurrencyGuard};
pub use coordinator::{
    FlowCreated, FlowStatus, FlowTransitionReceipt, InitializeRequest, OrchestrationCoordinator,
    ResumeRequest,
};
pub use deletion::{DeletionCoordinator, DeletionReceipt};
pub use execution_registry::{ExecutionRegistry, RunnerHandle};
pub use flow_runner::FlowRunner;
pub use health_monitor::{FlowHealthMonitor, SweepStats};
