//! # PostgreSQL Flow Record Store
//!
//! Production `FlowRecordStore` backed by sqlx.
//!
//! ## Overview
//!
//! All invariants that must hold under concurrency live in SQL, not in
//! application code:
//!
//! - **Active-flow uniqueness**: a partial unique index over
//!   `(tenant_id, scope_id, workflow_type)` restricted to active statuses,
//!   targeted by the creating insert's `ON CONFLICT` clause. There is no
//!   read-then-write window.
//! - **Lifecycle CAS**: `UPDATE ... WHERE id = $1 AND version = $2` with a
//!   version bump, so racing lifecycle writers cannot both win.
//! - **Lease exclusivity**: a single-row-per-flow lease table where takeover
//!   is an upsert gated on `expires_at <= NOW()`.
//!
//! Time comparisons (`expires_at`, staleness ages) are evaluated against the
//! database's clock so multiple orchestrator hosts never compare their own
//! clocks.

use crate::models::{
    ChildFlowRecord, ExecutionLease, FlowArtifact, MasterFlowRecord, NewChildFlow, NewFlowArtifact,
    NewMasterFlow, StuckFlowCandidate,
};
use crate::state_machine::LifecycleStatus;
use crate::store::{DeletedRecords, FlowRecordStore, StoreError, StoreResult};
use crate::workflow::WorkflowType;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, warn};
use uuid::Uuid;

const MASTER_COLUMNS: &str = "id, tenant_id, scope_id, workflow_type, lifecycle_status, \
     status_reason, version, created_at, updated_at";
const CHILD_COLUMNS: &str = "id, master_flow_id, current_phase, phase_progress, runtime_state, \
     resume_input, metrics, selected_entity_ids, created_at, updated_at";
const LEASE_COLUMNS: &str = "master_flow_id, holder_id, acquired_at, heartbeat_at, expires_at";

#[derive(Debug, sqlx::FromRow)]
struct MasterFlowRow {
    id: Uuid,
    tenant_id: String,
    scope_id: String,
    workflow_type: String,
    lifecycle_status: String,
    status_reason: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MasterFlowRow {
    fn into_record(self) -> StoreResult<MasterFlowRecord> {
        Ok(MasterFlowRecord {
            id: self.id,
            tenant_id: self.tenant_id,
            scope_id: self.scope_id,
            workflow_type: parse_column("workflow_type", &self.workflow_type)?,
            lifecycle_status: parse_column("lifecycle_status", &self.lifecycle_status)?,
            status_reason: self.status_reason,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChildFlowRow {
    id: Uuid,
    master_flow_id: Uuid,
    current_phase: String,
    phase_progress: serde_json::Value,
    runtime_state: serde_json::Value,
    resume_input: Option<serde_json::Value>,
    metrics: serde_json::Value,
    selected_entity_ids: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ChildFlowRow {
    fn into_record(self) -> StoreResult<ChildFlowRecord> {
        Ok(ChildFlowRecord {
            id: self.id,
            master_flow_id: self.master_flow_id,
            current_phase: parse_column("current_phase", &self.current_phase)?,
            phase_progress: serde_json::from_value(self.phase_progress)
                .map_err(|e| StoreError::serialization("phase_progress", e))?,
            runtime_state: self.runtime_state,
            resume_input: self.resume_input,
            metrics: serde_json::from_value(self.metrics)
                .map_err(|e| StoreError::serialization("metrics", e))?,
            selected_entity_ids: self.selected_entity_ids,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LeaseRow {
    master_flow_id: Uuid,
    holder_id: String,
    acquired_at: DateTime<Utc>,
    heartbeat_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<LeaseRow> for ExecutionLease {
    fn from(row: LeaseRow) -> Self {
        ExecutionLease {
            master_flow_id: row.master_flow_id,
            holder_id: row.holder_id,
            acquired_at: row.acquired_at,
            heartbeat_at: row.heartbeat_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ArtifactRow {
    id: Uuid,
    master_flow_id: Uuid,
    kind: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<ArtifactRow> for FlowArtifact {
    fn from(row: ArtifactRow) -> Self {
        FlowArtifact {
            id: row.id,
            master_flow_id: row.master_flow_id,
            kind: row.kind,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CandidateRow {
    id: Uuid,
    tenant_id: String,
    scope_id: String,
    workflow_type: String,
    lifecycle_status: String,
    status_reason: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    current_phase: String,
    stale_for_secs: i64,
}

impl CandidateRow {
    fn into_candidate(self) -> StoreResult<StuckFlowCandidate> {
        Ok(StuckFlowCandidate {
            master: MasterFlowRecord {
                id: self.id,
                tenant_id: self.tenant_id,
                scope_id: self.scope_id,
                workflow_type: parse_column("workflow_type", &self.workflow_type)?,
                lifecycle_status: parse_column("lifecycle_status", &self.lifecycle_status)?,
                status_reason: self.status_reason,
                version: self.version,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            current_phase: parse_column("current_phase", &self.current_phase)?,
            stale_for_secs: self.stale_for_secs,
        })
    }
}

fn parse_column<T: std::str::FromStr<Err = String>>(column: &str, value: &str) -> StoreResult<T> {
    value.parse().map_err(|reason| StoreError::Serialization {
        context: column.to_string(),
        reason,
    })
}

/// PostgreSQL-backed flow record store.
#[derive(Clone)]
pub struct PgFlowRecordStore {
    pool: PgPool,
}

impl PgFlowRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool and wrap it. The caller owns migration timing via
    /// [`Self::run_migrations`].
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::database("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply embedded migrations from `./migrations`.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database {
                operation: "run_migrations".to_string(),
                reason: e.to_string(),
            })
    }

    async fn find_active_with_phase(
        &self,
        tenant_id: &str,
        scope_id: &str,
        workflow_type: WorkflowType,
    ) -> StoreResult<Option<(MasterFlowRecord, Option<String>)>> {
        let query = r#"
            SELECT m.id, m.tenant_id, m.scope_id, m.workflow_type, m.lifecycle_status,
                   m.status_reason, m.version, m.created_at, m.updated_at,
                   c.current_phase
            FROM migflow_master_flows m
            LEFT JOIN migflow_child_flows c ON c.master_flow_id = m.id
            WHERE m.tenant_id = $1 AND m.scope_id = $2 AND m.workflow_type = $3
              AND m.lifecycle_status IN ('initialized', 'running', 'paused')
            LIMIT 1
        "#;

        #[derive(sqlx::FromRow)]
        struct ActiveRow {
            id: Uuid,
            tenant_id: String,
            scope_id: String,
            workflow_type: String,
            lifecycle_status: String,
            status_reason: Option<String>,
            version: i64,
            created_at: DateTime<Utc>,
            updated_at: DateTime<Utc>,
            current_phase: Option<String>,
        }

        let row = sqlx::query_as::<_, ActiveRow>(query)
            .bind(tenant_id)
            .bind(scope_id)
            .bind(workflow_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database("find_active", e))?;

        row.map(|row| {
            let phase = row.current_phase.clone();
            let master = MasterFlowRow {
                id: row.id,
                tenant_id: row.tenant_id,
                scope_id: row.scope_id,
                workflow_type: row.workflow_type,
                lifecycle_status: row.lifecycle_status,
                status_reason: row.status_reason,
                version: row.version,
                created_at: row.created_at,
                updated_at: row.updated_at,
            }
            .into_record()?;
            Ok((master, phase))
        })
        .transpose()
    }
}

#[async_trait]
impl FlowRecordStore for PgFlowRecordStore {
    async fn create_flow(
        &self,
        master: NewMasterFlow,
        child: NewChildFlow,
    ) -> StoreResult<(MasterFlowRecord, ChildFlowRecord)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::database("create_flow", e))?;

        // The ON CONFLICT target is the partial unique index over active
        // statuses, making guard and insert one atomic statement.
        let insert_master = format!(
            r#"
            INSERT INTO migflow_master_flows
                (id, tenant_id, scope_id, workflow_type, lifecycle_status,
                 status_reason, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'initialized', NULL, 1, NOW(), NOW())
            ON CONFLICT (tenant_id, scope_id, workflow_type)
                WHERE lifecycle_status IN ('initialized', 'running', 'paused')
                DO NOTHING
            RETURNING {MASTER_COLUMNS}
            "#
        );

        let master_row = sqlx::query_as::<_, MasterFlowRow>(&insert_master)
            .bind(Uuid::new_v4())
            .bind(&master.tenant_id)
            .bind(&master.scope_id)
            .bind(master.workflow_type.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::database("create_flow", e))?;

        let Some(master_row) = master_row else {
            drop(tx);
            // Lost the slot; report the surviving flow to the caller.
            let existing = self
                .find_active_with_phase(&master.tenant_id, &master.scope_id, master.workflow_type)
                .await?;
            return match existing {
                Some((existing_master, phase)) => Err(StoreError::DuplicateActiveFlow {
                    tenant_id: master.tenant_id,
                    scope_id: master.scope_id,
                    workflow_type: master.workflow_type,
                    existing_flow_id: existing_master.id,
                    existing_status: existing_master.lifecycle_status,
                    existing_phase: phase.as_deref().and_then(|p| p.parse().ok()),
                }),
                // The conflicting flow reached a terminal status between our
                // two statements. Callers retry.
                None => Err(StoreError::Database {
                    operation: "create_flow".to_string(),
                    reason: "active-flow guard rejected insert but no active flow found; retry"
                        .to_string(),
                }),
            };
        };

        let progress_json = serde_json::to_value(&child.phase_progress)
            .map_err(|e| StoreError::serialization("phase_progress", e))?;
        let insert_child = format!(
            r#"
            INSERT INTO migflow_child_flows
                (id, master_flow_id, current_phase, phase_progress, runtime_state,
                 resume_input, metrics, selected_entity_ids, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NULL, '{{}}'::JSONB, $6, NOW(), NOW())
            RETURNING {CHILD_COLUMNS}
            "#
        );

        let child_row = sqlx::query_as::<_, ChildFlowRow>(&insert_child)
            .bind(Uuid::new_v4())
            .bind(master_row.id)
            .bind(child.current_phase.as_str())
            .bind(progress_json)
            .bind(&child.runtime_state)
            .bind(&child.selected_entity_ids)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::database("create_flow", e))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::database("create_flow", e))?;

        debug!(
            master_flow_id = %master_row.id,
            tenant_id = %master.tenant_id,
            workflow_type = %master.workflow_type,
            "Created master and child flow records"
        );
        Ok((master_row.into_record()?, child_row.into_record()?))
    }

    async fn get_master(&self, master_flow_id: Uuid) -> StoreResult<MasterFlowRecord> {
        let query = format!(
            "SELECT {MASTER_COLUMNS} FROM migflow_master_flows WHERE id = $1"
        );
        let row = sqlx::query_as::<_, MasterFlowRow>(&query)
            .bind(master_flow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database("get_master", e))?;
        row.ok_or(StoreError::MasterNotFound { master_flow_id })?
            .into_record()
    }

    async fn get_child(&self, master_flow_id: Uuid) -> StoreResult<ChildFlowRecord> {
        let query = format!(
            "SELECT {CHILD_COLUMNS} FROM migflow_child_flows WHERE master_flow_id = $1"
        );
        let row = sqlx::query_as::<_, ChildFlowRow>(&query)
            .bind(master_flow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database("get_child", e))?;
        row.ok_or(StoreError::ChildNotFound { master_flow_id })?
            .into_record()
    }

    async fn find_active(
        &self,
        tenant_id: &str,
        scope_id: &str,
        workflow_type: WorkflowType,
    ) -> StoreResult<Option<MasterFlowRecord>> {
        Ok(self
            .find_active_with_phase(tenant_id, scope_id, workflow_type)
            .await?
            .map(|(master, _)| master))
    }

    async fn list_flows(
        &self,
        tenant_id: &str,
        scope_id: &str,
    ) -> StoreResult<Vec<MasterFlowRecord>> {
        let query = format!(
            r#"
            SELECT {MASTER_COLUMNS} FROM migflow_master_flows
            WHERE tenant_id = $1 AND scope_id = $2
            ORDER BY created_at DESC
            "#
        );
        let rows = sqlx::query_as::<_, MasterFlowRow>(&query)
            .bind(tenant_id)
            .bind(scope_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::database("list_flows", e))?;
        rows.into_iter().map(MasterFlowRow::into_record).collect()
    }

    async fn update_lifecycle(
        &self,
        master_flow_id: Uuid,
        expected_version: i64,
        status: LifecycleStatus,
        status_reason: Option<&str>,
    ) -> StoreResult<MasterFlowRecord> {
        let query = format!(
            r#"
            UPDATE migflow_master_flows
            SET lifecycle_status = $3, status_reason = $4,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {MASTER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, MasterFlowRow>(&query)
            .bind(master_flow_id)
            .bind(expected_version)
            .bind(status.as_str())
            .bind(status_reason)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database("update_lifecycle", e))?;

        match row {
            Some(row) => row.into_record(),
            None => {
                // Distinguish a missing row from a lost CAS race.
                let current: Option<(i64,)> =
                    sqlx::query_as("SELECT version FROM migflow_master_flows WHERE id = $1")
                        .bind(master_flow_id)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(|e| StoreError::database("update_lifecycle", e))?;
                match current {
                    None => Err(StoreError::MasterNotFound { master_flow_id }),
                    Some((actual,)) => Err(StoreError::VersionConflict {
                        master_flow_id,
                        expected: expected_version,
                        actual,
                    }),
                }
            }
        }
    }

    async fn save_child(&self, child: &ChildFlowRecord) -> StoreResult<ChildFlowRecord> {
        let progress_json = serde_json::to_value(&child.phase_progress)
            .map_err(|e| StoreError::serialization("phase_progress", e))?;
        let metrics_json = serde_json::to_value(&child.metrics)
            .map_err(|e| StoreError::serialization("metrics", e))?;
        let query = format!(
            r#"
            UPDATE migflow_child_flows
            SET current_phase = $2, phase_progress = $3, runtime_state = $4,
                resume_input = $5, metrics = $6, selected_entity_ids = $7,
                updated_at = NOW()
            WHERE master_flow_id = $1
            RETURNING {CHILD_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ChildFlowRow>(&query)
            .bind(child.master_flow_id)
            .bind(child.current_phase.as_str())
            .bind(progress_json)
            .bind(&child.runtime_state)
            .bind(&child.resume_input)
            .bind(metrics_json)
            .bind(&child.selected_entity_ids)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database("save_child", e))?;
        row.ok_or(StoreError::ChildNotFound {
            master_flow_id: child.master_flow_id,
        })?
        .into_record()
    }

    async fn touch_master(&self, master_flow_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("UPDATE migflow_master_flows SET updated_at = NOW() WHERE id = $1")
            .bind(master_flow_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::database("touch_master", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MasterNotFound { master_flow_id });
        }
        Ok(())
    }

    async fn stale_active_flows(
        &self,
        stale_for: Duration,
        limit: i64,
    ) -> StoreResult<Vec<StuckFlowCandidate>> {
        let query = r#"
            SELECT m.id, m.tenant_id, m.scope_id, m.workflow_type, m.lifecycle_status,
                   m.status_reason, m.version, m.created_at, m.updated_at,
                   c.current_phase,
                   EXTRACT(EPOCH FROM (NOW() - m.updated_at))::BIGINT AS stale_for_secs
            FROM migflow_master_flows m
            JOIN migflow_child_flows c ON c.master_flow_id = m.id
            WHERE m.lifecycle_status IN ('initialized', 'running')
              AND m.updated_at < NOW() - make_interval(secs => $1)
            ORDER BY m.updated_at ASC
            LIMIT $2
        "#;
        let rows = sqlx::query_as::<_, CandidateRow>(query)
            .bind(stale_for.num_seconds() as f64)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::database("stale_active_flows", e))?;
        rows.into_iter().map(CandidateRow::into_candidate).collect()
    }

    async fn delete_flow(&self, master_flow_id: Uuid) -> StoreResult<DeletedRecords> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::database("delete_flow", e))?;

        let artifact_ids: Vec<(Uuid,)> =
            sqlx::query_as("DELETE FROM migflow_flow_artifacts WHERE master_flow_id = $1 RETURNING id")
                .bind(master_flow_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| StoreError::database("delete_flow", e))?;

        let lease_released =
            sqlx::query("DELETE FROM migflow_execution_leases WHERE master_flow_id = $1")
                .bind(master_flow_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::database("delete_flow", e))?
                .rows_affected()
                > 0;

        let child_flow_id: Option<(Uuid,)> =
            sqlx::query_as("DELETE FROM migflow_child_flows WHERE master_flow_id = $1 RETURNING id")
                .bind(master_flow_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StoreError::database("delete_flow", e))?;

        let deleted_master =
            sqlx::query("DELETE FROM migflow_master_flows WHERE id = $1")
                .bind(master_flow_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::database("delete_flow", e))?;
        if deleted_master.rows_affected() == 0 {
            return Err(StoreError::MasterNotFound { master_flow_id });
        }

        // Orphan check before commit; any failure rolls the whole
        // transaction back.
        for table in [
            "migflow_child_flows",
            "migflow_flow_artifacts",
            "migflow_execution_leases",
        ] {
            let check = format!("SELECT COUNT(*) FROM {table} WHERE master_flow_id = $1");
            let (remaining,): (i64,) = sqlx::query_as(&check)
                .bind(master_flow_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| StoreError::database("delete_flow", e))?;
            if remaining > 0 {
                warn!(
                    master_flow_id = %master_flow_id,
                    table,
                    remaining,
                    "Orphan check failed, rolling back deletion"
                );
                return Err(StoreError::OrphanCheckFailed {
                    master_flow_id,
                    table: table.to_string(),
                    remaining,
                });
            }
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::database("delete_flow", e))?;

        Ok(DeletedRecords {
            master_flow_id,
            child_flow_id: child_flow_id.map(|(id,)| id),
            artifact_ids: artifact_ids.into_iter().map(|(id,)| id).collect(),
            lease_released,
        })
    }

    async fn insert_artifact(
        &self,
        master_flow_id: Uuid,
        artifact: NewFlowArtifact,
    ) -> StoreResult<FlowArtifact> {
        let query = r#"
            INSERT INTO migflow_flow_artifacts (id, master_flow_id, kind, payload, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, master_flow_id, kind, payload, created_at
        "#;
        let row = sqlx::query_as::<_, ArtifactRow>(query)
            .bind(Uuid::new_v4())
            .bind(master_flow_id)
            .bind(&artifact.kind)
            .bind(&artifact.payload)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db)
                    if matches!(db.kind(), sqlx::error::ErrorKind::ForeignKeyViolation) =>
                {
                    StoreError::MasterNotFound { master_flow_id }
                }
                _ => StoreError::database("insert_artifact", e),
            })?;
        Ok(row.into())
    }

    async fn list_artifacts(&self, master_flow_id: Uuid) -> StoreResult<Vec<FlowArtifact>> {
        let query = r#"
            SELECT id, master_flow_id, kind, payload, created_at
            FROM migflow_flow_artifacts
            WHERE master_flow_id = $1
            ORDER BY created_at ASC
        "#;
        let rows = sqlx::query_as::<_, ArtifactRow>(query)
            .bind(master_flow_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::database("list_artifacts", e))?;
        Ok(rows.into_iter().map(FlowArtifact::from).collect())
    }

    async fn try_acquire_lease(
        &self,
        master_flow_id: Uuid,
        holder_id: &str,
        ttl: Duration,
    ) -> StoreResult<Option<ExecutionLease>> {
        // Upsert that only displaces expired holders (or refreshes our own).
        let query = format!(
            r#"
            INSERT INTO migflow_execution_leases
                (master_flow_id, holder_id, acquired_at, heartbeat_at, expires_at)
            VALUES ($1, $2, NOW(), NOW(), NOW() + make_interval(secs => $3))
            ON CONFLICT (master_flow_id) DO UPDATE
            SET holder_id = EXCLUDED.holder_id,
                acquired_at = NOW(),
                heartbeat_at = NOW(),
                expires_at = EXCLUDED.expires_at
            WHERE migflow_execution_leases.expires_at <= NOW()
               OR migflow_execution_leases.holder_id = EXCLUDED.holder_id
            RETURNING {LEASE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, LeaseRow>(&query)
            .bind(master_flow_id)
            .bind(holder_id)
            .bind(ttl.num_seconds() as f64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database("try_acquire_lease", e))?;
        Ok(row.map(ExecutionLease::from))
    }

    async fn renew_lease(
        &self,
        master_flow_id: Uuid,
        holder_id: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let query = r#"
            UPDATE migflow_execution_leases
            SET heartbeat_at = NOW(), expires_at = NOW() + make_interval(secs => $3)
            WHERE master_flow_id = $1 AND holder_id = $2 AND expires_at > NOW()
        "#;
        let result = sqlx::query(query)
            .bind(master_flow_id)
            .bind(holder_id)
            .bind(ttl.num_seconds() as f64)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::database("renew_lease", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_lease(&self, master_flow_id: Uuid, holder_id: &str) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM migflow_execution_leases WHERE master_flow_id = $1 AND holder_id = $2",
        )
        .bind(master_flow_id)
        .bind(holder_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database("release_lease", e))?;
        Ok(())
    }

    async fn find_lease(&self, master_flow_id: Uuid) -> StoreResult<Option<ExecutionLease>> {
        let query = format!(
            "SELECT {LEASE_COLUMNS} FROM migflow_execution_leases WHERE master_flow_id = $1"
        );
        let row = sqlx::query_as::<_, LeaseRow>(&query)
            .bind(master_flow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database("find_lease", e))?;
        Ok(row.map(ExecutionLease::from))
    }

    async fn reap_expired_leases(&self) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM migflow_execution_leases WHERE expires_at <= NOW()")
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::database("reap_expired_leases", e))?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::database("ping", e))?;
        Ok(())
    }
}
