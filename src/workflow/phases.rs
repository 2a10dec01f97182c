//! # Phase Definitions
//!
//! Static, per-workflow-type phase orderings. A [`PhaseDefinition`] is the
//! single source of truth for "which phase comes next", for retryability, and
//! for the expected duration the health monitor uses when judging staleness.
//!
//! Definitions are fixed at compile time: the state machine never reorders or
//! skips phases, and only an explicit `resume(target_phase)` can move the
//! cursor, backward or equal only.

use super::types::WorkflowType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Closed set of phase identities across all workflow types.
///
/// Each workflow type uses an ordered subset of these. Dispatch to phase
/// handlers is keyed by `(WorkflowType, PhaseName)`, never by free-form
/// strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Planning,
    SourceScan,
    DependencyAnalysis,
    DataMigration,
    Extraction,
    Normalization,
    Load,
    FieldMapping,
    Scoring,
    ReportGeneration,
    Backup,
    Shutdown,
    Cleanup,
}

impl PhaseName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::SourceScan => "source_scan",
            Self::DependencyAnalysis => "dependency_analysis",
            Self::DataMigration => "data_migration",
            Self::Extraction => "extraction",
            Self::Normalization => "normalization",
            Self::Load => "load",
            Self::FieldMapping => "field_mapping",
            Self::Scoring => "scoring",
            Self::ReportGeneration => "report_generation",
            Self::Backup => "backup",
            Self::Shutdown => "shutdown",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PhaseName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Self::Planning),
            "source_scan" => Ok(Self::SourceScan),
            "dependency_analysis" => Ok(Self::DependencyAnalysis),
            "data_migration" => Ok(Self::DataMigration),
            "extraction" => Ok(Self::Extraction),
            "normalization" => Ok(Self::Normalization),
            "load" => Ok(Self::Load),
            "field_mapping" => Ok(Self::FieldMapping),
            "scoring" => Ok(Self::Scoring),
            "report_generation" => Ok(Self::ReportGeneration),
            "backup" => Ok(Self::Backup),
            "shutdown" => Ok(Self::Shutdown),
            "cleanup" => Ok(Self::Cleanup),
            _ => Err(format!("Invalid phase name: {s}")),
        }
    }
}

/// Per-phase execution contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSpec {
    pub name: PhaseName,
    /// Whether a failure in this phase leaves the flow resumable.
    pub retryable: bool,
    /// Expected wall-clock duration, used for staleness thresholds.
    pub expected_duration: Duration,
    /// Handler invocation timeout. `None` falls back to the configured default.
    pub timeout: Option<Duration>,
}

impl PhaseSpec {
    fn new(name: PhaseName, retryable: bool, expected_secs: u64) -> Self {
        Self {
            name,
            retryable,
            expected_duration: Duration::from_secs(expected_secs),
            timeout: None,
        }
    }
}

/// Ordered phase sequence for one workflow type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseDefinition {
    workflow_type: WorkflowType,
    phases: Vec<PhaseSpec>,
}

impl PhaseDefinition {
    /// The fixed phase ordering for `workflow_type`.
    ///
    /// Planning is deliberately non-retryable: a failure there means the flow
    /// input itself is bad and a fresh initialize is the right recovery.
    pub fn for_workflow(workflow_type: WorkflowType) -> Self {
        let phases = match workflow_type {
            WorkflowType::Discovery => vec![
                PhaseSpec::new(PhaseName::Planning, false, 300),
                PhaseSpec::new(PhaseName::SourceScan, true, 1800),
                PhaseSpec::new(PhaseName::DependencyAnalysis, true, 1200),
                PhaseSpec::new(PhaseName::DataMigration, true, 3600),
            ],
            WorkflowType::Collection => vec![
                PhaseSpec::new(PhaseName::Planning, false, 300),
                PhaseSpec::new(PhaseName::Extraction, true, 3600),
                PhaseSpec::new(PhaseName::Normalization, true, 1800),
                PhaseSpec::new(PhaseName::Load, true, 3600),
            ],
            WorkflowType::Assessment => vec![
                PhaseSpec::new(PhaseName::Planning, false, 300),
                PhaseSpec::new(PhaseName::FieldMapping, true, 1800),
                PhaseSpec::new(PhaseName::Scoring, true, 900),
                PhaseSpec::new(PhaseName::ReportGeneration, true, 600),
            ],
            WorkflowType::Decommission => vec![
                PhaseSpec::new(PhaseName::Planning, false, 300),
                PhaseSpec::new(PhaseName::Backup, true, 7200),
                PhaseSpec::new(PhaseName::Shutdown, false, 900),
                PhaseSpec::new(PhaseName::Cleanup, true, 1800),
            ],
        };

        Self {
            workflow_type,
            phases,
        }
    }

    pub fn workflow_type(&self) -> WorkflowType {
        self.workflow_type
    }

    pub fn phases(&self) -> &[PhaseSpec] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// First phase in the ordering; every definition has at least one.
    pub fn first_phase(&self) -> PhaseName {
        self.phases[0].name
    }

    pub fn spec(&self, phase: PhaseName) -> Option<&PhaseSpec> {
        self.phases.iter().find(|spec| spec.name == phase)
    }

    pub fn contains(&self, phase: PhaseName) -> bool {
        self.spec(phase).is_some()
    }

    /// Position of `phase` in the ordering.
    pub fn index_of(&self, phase: PhaseName) -> Option<usize> {
        self.phases.iter().position(|spec| spec.name == phase)
    }

    /// The phase following `phase`, or `None` when `phase` is the last one.
    pub fn next_after(&self, phase: PhaseName) -> Option<PhaseName> {
        let idx = self.index_of(phase)?;
        self.phases.get(idx + 1).map(|spec| spec.name)
    }

    pub fn is_retryable(&self, phase: PhaseName) -> bool {
        self.spec(phase).map(|spec| spec.retryable).unwrap_or(false)
    }

    /// Expected duration for `phase`, used by the health monitor.
    pub fn expected_duration(&self, phase: PhaseName) -> Duration {
        self.spec(phase)
            .map(|spec| spec.expected_duration)
            .unwrap_or(Duration::from_secs(300))
    }
}
