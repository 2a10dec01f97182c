use crate::workflow::{PhaseName, WorkflowType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// What changed on a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowEventKind {
    FlowInitialized,
    ExecutionStarted,
    PhaseStarted { phase: PhaseName },
    PhaseCompleted { phase: PhaseName },
    PhaseFailed { phase: PhaseName, error: String },
    FlowPaused { at_phase: PhaseName },
    FlowResumed { from_phase: PhaseName },
    FlowCompleted,
    FlowFailed { reason: String },
    FlowCancelled { reason: Option<String> },
    FlowDeleted,
    /// Health monitor reclaimed a stuck flow (`marked_failed` or
    /// `force_cancelled`).
    FlowReclaimed { action: String },
}

/// A published flow notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowLifecycleEvent {
    pub master_flow_id: Uuid,
    pub tenant_id: String,
    pub workflow_type: WorkflowType,
    #[serde(flatten)]
    pub kind: FlowEventKind,
    pub published_at: DateTime<Utc>,
}

impl FlowLifecycleEvent {
    pub fn new(
        master_flow_id: Uuid,
        tenant_id: impl Into<String>,
        workflow_type: WorkflowType,
        kind: FlowEventKind,
    ) -> Self {
        Self {
            master_flow_id,
            tenant_id: tenant_id.into(),
            workflow_type,
            kind,
            published_at: Utc::now(),
        }
    }
}

/// Broadcast publisher for flow lifecycle events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<FlowLifecycleEvent>,
}

impl EventPublisher {
    /// Create a publisher with the given channel capacity. Slow subscribers
    /// that fall more than `capacity` events behind see `Lagged` on receive.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. A channel with zero subscribers swallows the event;
    /// that is the normal state for embedded and test deployments.
    pub fn publish(&self, event: FlowLifecycleEvent) {
        // send only errors when no receiver exists, which is fine for
        // fire-and-forget notification.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowLifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}
