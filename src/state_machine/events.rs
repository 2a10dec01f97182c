use serde::{Deserialize, Serialize};

/// Events that drive flow state transitions.
///
/// The background runner emits `PhaseSucceeded`/`PhaseFailed` as handlers
/// finish; the coordinator emits the remaining events on behalf of callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FlowEvent {
    /// The current phase's handler finished successfully
    PhaseSucceeded,
    /// The current phase's handler failed with an error message
    PhaseFailed(String),
    /// A caller requested a cooperative pause
    FlowPaused,
    /// A caller resumed a paused or retryable-failed flow
    FlowResumed,
    /// A caller cancelled the flow
    FlowCancelled,
}

impl FlowEvent {
    /// Stable identifier for logging and transition records.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PhaseSucceeded => "phase_succeeded",
            Self::PhaseFailed(_) => "phase_failed",
            Self::FlowPaused => "flow_paused",
            Self::FlowResumed => "flow_resumed",
            Self::FlowCancelled => "flow_cancelled",
        }
    }

    /// Extract the error message if this is a failure event.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::PhaseFailed(msg) => Some(msg),
            _ => None,
        }
    }

    /// Create a failure event with the given error message.
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::PhaseFailed(error.into())
    }
}
