use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a master flow record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    /// Flow has been created but phase execution has not started yet
    Initialized,
    /// A background runner is progressing through the phases
    Running,
    /// Execution stopped cooperatively; progress is retained
    Paused,
    /// All phases completed successfully
    Completed,
    /// A phase failed, or the flow was reclaimed by the health monitor
    Failed,
    /// The flow was cancelled; completed phases are not rolled back
    Cancelled,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Active states count against the one-active-flow-per-scope constraint.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether `resume` may be attempted from this state. Resuming a failed
    /// flow additionally requires the failed phase to be retryable.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Paused | Self::Failed)
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LifecycleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(Self::Initialized),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid lifecycle status: {s}")),
        }
    }
}

impl Default for LifecycleStatus {
    fn default() -> Self {
        Self::Initialized
    }
}

/// Per-phase progress states recorded on the child flow record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Not reached yet
    Pending,
    /// Handler is currently executing (or was, when the flow stopped)
    InProgress,
    /// Handler finished successfully; result is durably persisted
    Completed,
    /// Handler raised an error or timed out
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PhaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid phase status: {s}")),
        }
    }
}

impl Default for PhaseStatus {
    fn default() -> Self {
        Self::Pending
    }
}
