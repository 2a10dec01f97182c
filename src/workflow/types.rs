use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow types supported by the migration platform.
///
/// Each type owns a fixed, ordered phase sequence (see
/// [`PhaseDefinition`](crate::workflow::PhaseDefinition)). The concurrency
/// guard admits at most one active flow per `(tenant, scope, workflow type)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    /// Inventory the source estate and migrate discovered metadata
    Discovery,
    /// Extract and load the selected entities
    Collection,
    /// Score and map the collected data for migration readiness
    Assessment,
    /// Retire the source system after migration
    Decommission,
}

impl WorkflowType {
    /// All known workflow types, in declaration order.
    pub const ALL: [WorkflowType; 4] = [
        WorkflowType::Discovery,
        WorkflowType::Collection,
        WorkflowType::Assessment,
        WorkflowType::Decommission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Collection => "collection",
            Self::Assessment => "assessment",
            Self::Decommission => "decommission",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovery" => Ok(Self::Discovery),
            "collection" => Ok(Self::Collection),
            "assessment" => Ok(Self::Assessment),
            "decommission" => Ok(Self::Decommission),
            _ => Err(format!("Invalid workflow type: {s}")),
        }
    }
}
