//! # Child Flow Record
//!
//! Operational state for one workflow instance: phase cursor, per-phase
//! progress, handler-owned runtime state, and counters.
//!
//! ## Overview
//!
//! Exactly one `ChildFlowRecord` exists per master flow (composition, not
//! sharing). It is created in the same transaction as its master and deleted
//! with it. The background runner is the main writer as phases progress; the
//! coordinator writes on pause/resume/cancel.
//!
//! `runtime_state` is an opaque payload owned by phase handlers. The
//! orchestration layer stores and forwards it but never interprets its
//! contents; handlers version the payload internally.
//!
//! ## Progress Invariant
//!
//! `current_phase` is always present in `phase_progress`; entries before the
//! cursor are `completed` and entries after it are `pending`. The cursor entry
//! itself may be `pending`, `in_progress`, or `failed` depending on where the
//! runner stopped.

use crate::state_machine::states::PhaseStatus;
use crate::workflow::{PhaseDefinition, PhaseName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Progress entry for a single phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgressEntry {
    pub name: PhaseName,
    pub status: PhaseStatus,
    /// Error detail recorded when the phase failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PhaseProgressEntry {
    fn pending(name: PhaseName) -> Self {
        Self {
            name,
            status: PhaseStatus::Pending,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Ordered per-phase progress, entry order matching the phase definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseProgress(Vec<PhaseProgressEntry>);

impl PhaseProgress {
    /// All phases pending, in definition order.
    pub fn for_definition(definition: &PhaseDefinition) -> Self {
        Self(
            definition
                .phases()
                .iter()
                .map(|spec| PhaseProgressEntry::pending(spec.name))
                .collect(),
        )
    }

    pub fn entries(&self) -> &[PhaseProgressEntry] {
        &self.0
    }

    pub fn entry(&self, name: PhaseName) -> Option<&PhaseProgressEntry> {
        self.0.iter().find(|entry| entry.name == name)
    }

    fn entry_mut(&mut self, name: PhaseName) -> Option<&mut PhaseProgressEntry> {
        self.0.iter_mut().find(|entry| entry.name == name)
    }

    pub fn status_of(&self, name: PhaseName) -> Option<PhaseStatus> {
        self.entry(name).map(|entry| entry.status)
    }

    pub fn index_of(&self, name: PhaseName) -> Option<usize> {
        self.0.iter().position(|entry| entry.name == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.0
            .iter()
            .filter(|entry| entry.status.is_completed())
            .count()
    }

    /// Mark `name` in progress and stamp its start time.
    pub fn mark_started(&mut self, name: PhaseName, at: DateTime<Utc>) {
        if let Some(entry) = self.entry_mut(name) {
            entry.status = PhaseStatus::InProgress;
            entry.error = None;
            if entry.started_at.is_none() {
                entry.started_at = Some(at);
            }
        }
    }

    pub fn mark_completed(&mut self, name: PhaseName, at: DateTime<Utc>) {
        if let Some(entry) = self.entry_mut(name) {
            entry.status = PhaseStatus::Completed;
            entry.error = None;
            entry.completed_at = Some(at);
        }
    }

    pub fn mark_failed(&mut self, name: PhaseName, error: impl Into<String>) {
        if let Some(entry) = self.entry_mut(name) {
            entry.status = PhaseStatus::Failed;
            entry.error = Some(error.into());
        }
    }

    /// Reset `name` and every later entry to pending, clearing errors and
    /// timestamps. Used by resume rewinds and retry-after-failure.
    pub fn reset_from(&mut self, name: PhaseName) {
        if let Some(start) = self.index_of(name) {
            for entry in &mut self.0[start..] {
                entry.status = PhaseStatus::Pending;
                entry.error = None;
                entry.started_at = None;
                entry.completed_at = None;
            }
        }
    }

    /// Check the progress invariant against a cursor position: everything
    /// before `current` completed, everything after it pending.
    pub fn is_consistent_with(&self, definition: &PhaseDefinition, current: PhaseName) -> bool {
        let Some(cursor) = definition.index_of(current) else {
            return false;
        };
        if self.0.len() != definition.len() {
            return false;
        }
        for (idx, entry) in self.0.iter().enumerate() {
            if definition.phases()[idx].name != entry.name {
                return false;
            }
            if idx < cursor && !entry.status.is_completed() {
                return false;
            }
            if idx > cursor && entry.status != PhaseStatus::Pending {
                return false;
            }
        }
        true
    }
}

/// Numeric counters accumulated by phase handlers (rows scanned, entities
/// migrated, ...). Stored as JSONB; merged additively between phases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowMetrics(BTreeMap<String, i64>);

impl FlowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> i64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, key: impl Into<String>, delta: i64) {
        *self.0.entry(key.into()).or_insert(0) += delta;
    }

    /// Additively merge another counter set into this one.
    pub fn merge(&mut self, other: &FlowMetrics) {
        for (key, delta) in &other.0 {
            *self.0.entry(key.clone()).or_insert(0) += delta;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &i64)> {
        self.0.iter()
    }
}

impl FromIterator<(String, i64)> for FlowMetrics {
    fn from_iter<T: IntoIterator<Item = (String, i64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Operational record owned by one master flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildFlowRecord {
    pub id: Uuid,
    pub master_flow_id: Uuid,
    pub current_phase: PhaseName,
    pub phase_progress: PhaseProgress,
    /// Opaque, handler-owned payload; the orchestrator never inspects it.
    pub runtime_state: serde_json::Value,
    /// User input staged by `resume`, consumed by the next phase invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_input: Option<serde_json::Value>,
    pub metrics: FlowMetrics,
    pub selected_entity_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChildFlowRecord {
    /// Completion percentage derived from phase progress, for status views.
    pub fn completion_percentage(&self) -> f64 {
        if self.phase_progress.is_empty() {
            return 0.0;
        }
        (self.phase_progress.completed_count() as f64 / self.phase_progress.len() as f64) * 100.0
    }
}

/// Creation payload for a child flow; the store links it to its master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChildFlow {
    pub current_phase: PhaseName,
    pub phase_progress: PhaseProgress,
    pub runtime_state: serde_json::Value,
    pub selected_entity_ids: Vec<String>,
}

impl NewChildFlow {
    /// Fresh child state for a definition: cursor on the first phase, all
    /// phases pending.
    pub fn for_definition(
        definition: &PhaseDefinition,
        selected_entity_ids: Vec<String>,
        runtime_state: serde_json::Value,
    ) -> Self {
        Self {
            current_phase: definition.first_phase(),
            phase_progress: PhaseProgress::for_definition(definition),
            runtime_state,
            selected_entity_ids,
        }
    }
}
