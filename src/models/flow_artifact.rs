//! # Flow Artifact
//!
//! Durable outputs produced by phase handlers: scan summaries, dependency
//! graphs, assessment reports. Artifacts survive phase rewinds so a resumed
//! flow can replace rather than lose earlier results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted phase output attached to a master flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowArtifact {
    pub id: Uuid,
    pub master_flow_id: Uuid,
    /// Handler-chosen discriminator, e.g. `scan_summary` or `report`.
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Creation payload emitted by a phase handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFlowArtifact {
    pub kind: String,
    pub payload: serde_json::Value,
}

impl NewFlowArtifact {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}
