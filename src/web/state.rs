//! Shared application state handed to every handler.

use crate::orchestration::{FlowHealthMonitor, OrchestrationCoordinator};
use crate::store::FlowRecordStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Cloneable bundle of the orchestration services the API fronts.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<OrchestrationCoordinator>,
    pub store: Arc<dyn FlowRecordStore>,
    pub monitor: Arc<FlowHealthMonitor>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        coordinator: Arc<OrchestrationCoordinator>,
        store: Arc<dyn FlowRecordStore>,
        monitor: Arc<FlowHealthMonitor>,
    ) -> Self {
        Self {
            coordinator,
            store,
            monitor,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
