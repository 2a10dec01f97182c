//! # Phase Handler Registry
//!
//! Maps `(workflow_type, phase)` to the business logic that executes it.
//!
//! ## Overview
//!
//! The background runner resolves every phase through this registry before
//! invoking it; a missing registration fails the phase with a handler error
//! rather than crashing the runner. Registrations happen at startup, but the
//! map is lock-protected so embedded deployments may swap handlers at
//! runtime.
//!
//! ## Usage
//!
//! ```rust
//! use migflow_core::registry::{PhaseHandlerRegistry, PhaseOutcome};
//! use migflow_core::workflow::{PhaseName, WorkflowType};
//!
//! let registry = PhaseHandlerRegistry::new();
//! registry.register_fn(WorkflowType::Discovery, PhaseName::Planning, |ctx| async move {
//!     Ok(PhaseOutcome::with_state(ctx.runtime_state))
//! });
//! assert!(registry.contains(WorkflowType::Discovery, PhaseName::Planning));
//! ```

pub mod handler;

pub use handler::{FnPhaseHandler, PhaseContext, PhaseError, PhaseHandler, PhaseOutcome};

use crate::workflow::{PhaseDefinition, PhaseName, WorkflowType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Thread-safe handler lookup keyed by workflow type and phase.
#[derive(Default)]
pub struct PhaseHandlerRegistry {
    handlers: RwLock<HashMap<(WorkflowType, PhaseName), Arc<dyn PhaseHandler>>>,
}

impl PhaseHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous registration for the slot.
    pub fn register(
        &self,
        workflow_type: WorkflowType,
        phase: PhaseName,
        handler: Arc<dyn PhaseHandler>,
    ) {
        let replaced = self
            .handlers
            .write()
            .insert((workflow_type, phase), handler)
            .is_some();
        debug!(
            workflow_type = %workflow_type,
            phase = %phase,
            replaced,
            "Registered phase handler"
        );
    }

    /// Register an async closure as the handler for a slot.
    pub fn register_fn<F, Fut>(&self, workflow_type: WorkflowType, phase: PhaseName, f: F)
    where
        F: Fn(PhaseContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PhaseOutcome, PhaseError>> + Send + 'static,
    {
        self.register(workflow_type, phase, Arc::new(FnPhaseHandler::new(f)));
    }

    pub fn get(&self, workflow_type: WorkflowType, phase: PhaseName) -> Option<Arc<dyn PhaseHandler>> {
        self.handlers.read().get(&(workflow_type, phase)).cloned()
    }

    pub fn contains(&self, workflow_type: WorkflowType, phase: PhaseName) -> bool {
        self.handlers.read().contains_key(&(workflow_type, phase))
    }

    /// Phases of `definition` that have no registered handler. Startup
    /// validation calls this per enabled workflow type.
    pub fn missing_handlers(&self, definition: &PhaseDefinition) -> Vec<PhaseName> {
        let handlers = self.handlers.read();
        definition
            .phases()
            .iter()
            .map(|spec| spec.name)
            .filter(|phase| !handlers.contains_key(&(definition.workflow_type(), *phase)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}
