//! # Flow Management Handlers
//!
//! HTTP handlers for flow creation, control operations, status retrieval,
//! and deletion. Thin adapters over the coordinator: request DTOs in,
//! coordinator receipts out, with errors translated by `ApiError`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{FlowArtifact, FlowMetrics, MasterFlowRecord, PhaseProgressEntry};
use crate::orchestration::{
    DeletionReceipt, FlowCreated, FlowStatus, FlowTransitionReceipt, InitializeRequest,
    ResumeRequest,
};
use crate::state_machine::LifecycleStatus;
use crate::web::errors::ApiResult;
use crate::web::extractors::TenantContext;
use crate::web::state::AppState;
use crate::workflow::{PhaseName, WorkflowType};

/// Request body for `POST /v1/flows/initialize`. Tenancy comes from the
/// headers.
#[derive(Debug, Deserialize)]
pub struct CreateFlowRequest {
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub selected_entity_ids: Vec<String>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

/// Optional filters for `GET /v1/flows`.
#[derive(Debug, Default, Deserialize)]
pub struct ListFlowsQuery {
    #[serde(default)]
    pub status: Option<LifecycleStatus>,
    #[serde(default)]
    pub workflow_type: Option<WorkflowType>,
}

/// Request body for `POST /v1/flows/:id/cancel`; the body is optional.
#[derive(Debug, Default, Deserialize)]
pub struct CancelFlowRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteFlowQuery {
    #[serde(default)]
    pub force: bool,
    /// Who is asking; defaults to `api` when the caller does not say.
    #[serde(default)]
    pub actor: Option<String>,
}

/// Full status view for one flow.
#[derive(Debug, Serialize)]
pub struct FlowStatusResponse {
    pub master_flow_id: Uuid,
    pub tenant_id: String,
    pub scope_id: String,
    pub workflow_type: WorkflowType,
    pub lifecycle_status: LifecycleStatus,
    pub status_reason: Option<String>,
    pub executing: bool,
    pub current_phase: PhaseName,
    pub completion_percentage: f64,
    pub phases: Vec<PhaseProgressEntry>,
    pub metrics: FlowMetrics,
    pub selected_entity_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FlowStatus> for FlowStatusResponse {
    fn from(status: FlowStatus) -> Self {
        let FlowStatus {
            master,
            child,
            executing,
        } = status;
        Self {
            master_flow_id: master.id,
            tenant_id: master.tenant_id,
            scope_id: master.scope_id,
            workflow_type: master.workflow_type,
            lifecycle_status: master.lifecycle_status,
            status_reason: master.status_reason,
            executing,
            current_phase: child.current_phase,
            completion_percentage: child.completion_percentage(),
            phases: child.phase_progress.entries().to_vec(),
            metrics: child.metrics,
            selected_entity_ids: child.selected_entity_ids,
            created_at: master.created_at,
            updated_at: master.updated_at,
        }
    }
}

/// One row in the list view.
#[derive(Debug, Serialize)]
pub struct FlowSummary {
    pub master_flow_id: Uuid,
    pub workflow_type: WorkflowType,
    pub lifecycle_status: LifecycleStatus,
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MasterFlowRecord> for FlowSummary {
    fn from(master: MasterFlowRecord) -> Self {
        Self {
            master_flow_id: master.id,
            workflow_type: master.workflow_type,
            lifecycle_status: master.lifecycle_status,
            status_reason: master.status_reason,
            created_at: master.created_at,
            updated_at: master.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlowListResponse {
    pub flows: Vec<FlowSummary>,
}

#[derive(Debug, Serialize)]
pub struct ArtifactListResponse {
    pub artifacts: Vec<FlowArtifact>,
}

/// Create a new flow: `POST /v1/flows/initialize`
pub async fn create_flow(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(body): Json<CreateFlowRequest>,
) -> ApiResult<(StatusCode, Json<FlowCreated>)> {
    let created = state
        .coordinator
        .initialize(InitializeRequest {
            tenant_id: tenant.tenant_id,
            scope_id: tenant.scope_id,
            workflow_type: body.workflow_type,
            selected_entity_ids: body.selected_entity_ids,
            input: body.input,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// List flows for the tenant scope, optionally narrowed by status or
/// workflow type: `GET /v1/flows?status=running&workflow_type=discovery`
pub async fn list_flows(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<ListFlowsQuery>,
) -> ApiResult<Json<FlowListResponse>> {
    let flows = state
        .coordinator
        .list_flows(&tenant.tenant_id, &tenant.scope_id)
        .await?;
    let flows = flows
        .into_iter()
        .filter(|flow| {
            query
                .status
                .map_or(true, |status| flow.lifecycle_status == status)
        })
        .filter(|flow| {
            query
                .workflow_type
                .map_or(true, |workflow_type| flow.workflow_type == workflow_type)
        })
        .map(FlowSummary::from)
        .collect();
    Ok(Json(FlowListResponse { flows }))
}

/// Flow status: `GET /v1/flows/:id/status`
pub async fn get_flow(
    State(state): State<AppState>,
    Path(master_flow_id): Path<Uuid>,
) -> ApiResult<Json<FlowStatusResponse>> {
    let status = state.coordinator.status(master_flow_id).await?;
    Ok(Json(status.into()))
}

/// Artifacts produced by a flow: `GET /v1/flows/:id/artifacts`
pub async fn list_flow_artifacts(
    State(state): State<AppState>,
    Path(master_flow_id): Path<Uuid>,
) -> ApiResult<Json<ArtifactListResponse>> {
    let artifacts = state.coordinator.artifacts(master_flow_id).await?;
    Ok(Json(ArtifactListResponse { artifacts }))
}

/// Pause a running flow: `POST /v1/flows/:id/pause`
pub async fn pause_flow(
    State(state): State<AppState>,
    Path(master_flow_id): Path<Uuid>,
) -> ApiResult<Json<FlowTransitionReceipt>> {
    let receipt = state.coordinator.pause(master_flow_id).await?;
    Ok(Json(receipt))
}

/// Resume a paused or retryable-failed flow: `POST /v1/flows/:id/resume`
pub async fn resume_flow(
    State(state): State<AppState>,
    Path(master_flow_id): Path<Uuid>,
    body: Option<Json<ResumeRequest>>,
) -> ApiResult<Json<FlowTransitionReceipt>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let receipt = state.coordinator.resume(master_flow_id, request).await?;
    Ok(Json(receipt))
}

/// Cancel a flow: `POST /v1/flows/:id/cancel`
pub async fn cancel_flow(
    State(state): State<AppState>,
    Path(master_flow_id): Path<Uuid>,
    body: Option<Json<CancelFlowRequest>>,
) -> ApiResult<Json<FlowTransitionReceipt>> {
    let reason = body.and_then(|Json(request)| request.reason);
    let receipt = state.coordinator.cancel(master_flow_id, reason).await?;
    Ok(Json(receipt))
}

/// Delete a flow and its records: `DELETE /v1/flows/:id?force=true&actor=ops`
pub async fn delete_flow(
    State(state): State<AppState>,
    Path(master_flow_id): Path<Uuid>,
    Query(query): Query<DeleteFlowQuery>,
) -> ApiResult<Json<DeletionReceipt>> {
    let actor = query.actor.as_deref().unwrap_or("api");
    let receipt = state
        .coordinator
        .delete(master_flow_id, actor, query.force)
        .await?;
    Ok(Json(receipt))
}
