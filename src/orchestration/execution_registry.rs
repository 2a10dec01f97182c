//! # Execution Registry
//!
//! Process-local view of which flows this orchestrator is executing right
//! now, keyed by master flow id.
//!
//! ## Overview
//!
//! Registration is the idempotency gate for background scheduling: a second
//! start request for a flow already registered here is a no-op. The registry
//! also carries the cooperative stop signal a runner checks at every phase
//! boundary. Cross-process exclusivity is the execution lease's job; this
//! registry only answers for the local process.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Shared control block for one executing flow.
#[derive(Debug)]
pub struct RunnerHandle {
    master_flow_id: Uuid,
    stop: AtomicBool,
    started_at: DateTime<Utc>,
}

impl RunnerHandle {
    fn new(master_flow_id: Uuid) -> Self {
        Self {
            master_flow_id,
            stop: AtomicBool::new(false),
            started_at: Utc::now(),
        }
    }

    pub fn master_flow_id(&self) -> Uuid {
        self.master_flow_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Ask the runner to stop at its next phase boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Concurrent map of flows executing in this process.
#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    entries: DashMap<Uuid, Arc<RunnerHandle>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a flow for execution. Returns `None` when the flow is
    /// already registered, making duplicate scheduling a no-op.
    pub fn try_register(&self, master_flow_id: Uuid) -> Option<Arc<RunnerHandle>> {
        match self.entries.entry(master_flow_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let handle = Arc::new(RunnerHandle::new(master_flow_id));
                vacant.insert(handle.clone());
                Some(handle)
            }
        }
    }

    /// Remove a flow after its runner exits.
    pub fn deregister(&self, master_flow_id: Uuid) {
        self.entries.remove(&master_flow_id);
    }

    pub fn get(&self, master_flow_id: Uuid) -> Option<Arc<RunnerHandle>> {
        self.entries
            .get(&master_flow_id)
            .map(|entry| entry.value().clone())
    }

    pub fn is_executing(&self, master_flow_id: Uuid) -> bool {
        self.entries.contains_key(&master_flow_id)
    }

    /// Signal a stop if the flow runs locally. Returns whether a handle was
    /// found.
    pub fn request_stop(&self, master_flow_id: Uuid) -> bool {
        match self.get(master_flow_id) {
            Some(handle) => {
                handle.request_stop();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active_flow_ids(&self) -> Vec<Uuid> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }
}
