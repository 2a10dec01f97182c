//! # State Machine Module
//!
//! Lifecycle and phase state management for migration flows.
//!
//! ## Overview
//!
//! Two state spaces live here:
//!
//! - **Lifecycle states** (`LifecycleStatus`): the master flow's coarse
//!   status (initialized, running, paused, completed, failed, cancelled)
//!   driven by user operations and runner outcomes.
//! - **Phase states** (`PhaseStatus` + `PhaseStateMachine`): per-phase
//!   progress within one workflow definition, advanced strictly in order by
//!   the background runner.
//!
//! Transitions are computed as pure functions over in-memory snapshots; the
//! orchestration layer persists outcomes through the record store. This
//! keeps ordering and rewind rules verifiable in isolation.

pub mod events;
pub mod phase_state_machine;
pub mod states;

pub use events::FlowEvent;
pub use phase_state_machine::{
    FlowDisposition, PhaseStateMachine, TransitionError, TransitionOutcome,
};
pub use states::{LifecycleStatus, PhaseStatus};
