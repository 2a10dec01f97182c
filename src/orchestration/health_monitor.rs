//! # Flow Health Monitor
//!
//! Background reclamation of flows that stopped making progress.
//!
//! ## Overview
//!
//! Runners heartbeat by touching their master record, so an active flow
//! whose `updated_at` stops moving has lost its executor (crashed process,
//! revoked lease) or the executor itself is wedged. The monitor sweeps on an
//! interval and judges each stale candidate against two per-phase ceilings
//! derived from the phase's expected duration:
//!
//! - past the failure ceiling with no live lease, the flow is marked
//!   `failed` with reason `stuck_no_executor`, freeing the tenant slot and
//!   leaving the flow resumable where the phase allows it;
//! - past the larger force-cancel ceiling while a lease is still being
//!   renewed, the executor is presumed wedged and the flow is cancelled
//!   outright.
//!
//! Everything in between is left alone. Both ceilings clamp to a floor so
//! short phases do not flap. Reclamation writes go through the same
//! optimistic-lock CAS as every other lifecycle write; losing the CAS means
//! something else settled the flow first and the candidate is skipped.

use crate::config::HealthConfig;
use crate::error::Result;
use crate::events::{EventPublisher, FlowEventKind, FlowLifecycleEvent};
use crate::models::StuckFlowCandidate;
use crate::orchestration::execution_registry::ExecutionRegistry;
use crate::state_machine::LifecycleStatus;
use crate::store::{FlowRecordStore, StoreError};
use crate::workflow::PhaseDefinition;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

/// Counters from one sweep, for logs and deterministic tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub marked_failed: usize,
    pub force_cancelled: usize,
    pub left_alone: usize,
    pub leases_reaped: usize,
}

enum Reclamation {
    MarkedFailed,
    ForceCancelled,
    LeftAlone,
}

/// Periodic stuck-flow scanner.
pub struct FlowHealthMonitor {
    store: Arc<dyn FlowRecordStore>,
    executions: Arc<ExecutionRegistry>,
    events: EventPublisher,
    config: HealthConfig,
    running: AtomicBool,
    shutdown: Notify,
}

impl FlowHealthMonitor {
    pub fn new(
        store: Arc<dyn FlowRecordStore>,
        executions: Arc<ExecutionRegistry>,
        events: EventPublisher,
        config: HealthConfig,
    ) -> Self {
        Self {
            store,
            executions,
            events,
            config,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Spawn the sweep loop. Idempotent; a disabled config is a no-op.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("Health monitoring disabled by configuration");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.run().await;
        });
    }

    /// Signal the sweep loop to exit after its current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run(&self) {
        info!(
            scan_interval_secs = self.config.scan_interval_secs,
            stale_failure_multiplier = self.config.stale_failure_multiplier,
            force_cancel_multiplier = self.config.force_cancel_multiplier,
            "Health monitor started"
        );
        while self.running.load(Ordering::SeqCst) {
            match self.sweep().await {
                Ok(stats) if stats.scanned > 0 => info!(
                    scanned = stats.scanned,
                    marked_failed = stats.marked_failed,
                    force_cancelled = stats.force_cancelled,
                    left_alone = stats.left_alone,
                    "Health sweep finished"
                ),
                Ok(_) => debug!("Health sweep found no stale flows"),
                Err(error) => warn!(error = %error, "Health sweep failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.scan_interval()) => {}
                _ = self.shutdown.notified() => {}
            }
        }
        info!("Health monitor stopped");
    }

    /// One full scan-and-reclaim pass.
    ///
    /// Expired leases are dropped first so the per-candidate liveness check
    /// sees only leases that are actually being renewed. The scan pulls flows
    /// stale past the floor; per-candidate ceilings are applied here because
    /// they depend on the phase the flow is stuck in.
    pub async fn sweep(&self) -> Result<SweepStats> {
        let reaped = self.store.reap_expired_leases().await?;
        if reaped > 0 {
            debug!(reaped, "Expired execution leases removed");
        }

        let floor = chrono::Duration::seconds(self.config.staleness_floor_secs as i64);
        let candidates = self
            .store
            .stale_active_flows(floor, self.config.scan_batch_limit)
            .await?;

        let mut stats = SweepStats {
            scanned: candidates.len(),
            leases_reaped: reaped as usize,
            ..SweepStats::default()
        };
        for candidate in candidates {
            match self.assess(&candidate).await {
                Ok(Reclamation::MarkedFailed) => stats.marked_failed += 1,
                Ok(Reclamation::ForceCancelled) => stats.force_cancelled += 1,
                Ok(Reclamation::LeftAlone) => stats.left_alone += 1,
                Err(error) => {
                    warn!(
                        master_flow_id = %candidate.master.id,
                        error = %error,
                        "Could not assess stale flow"
                    );
                    stats.left_alone += 1;
                }
            }
        }
        Ok(stats)
    }

    #[instrument(skip(self, candidate), fields(
        master_flow_id = %candidate.master.id,
        current_phase = %candidate.current_phase,
        stale_for_secs = candidate.stale_for_secs,
    ))]
    async fn assess(&self, candidate: &StuckFlowCandidate) -> Result<Reclamation> {
        let definition = PhaseDefinition::for_workflow(candidate.master.workflow_type);
        let expected_secs = definition
            .expected_duration(candidate.current_phase)
            .as_secs_f64();
        let floor = self.config.staleness_floor_secs as f64;
        let fail_after = (expected_secs * self.config.stale_failure_multiplier).max(floor);
        let force_after = (expected_secs * self.config.force_cancel_multiplier).max(floor);
        let stale_secs = candidate.stale_for_secs as f64;

        let lease_live = self
            .store
            .find_lease(candidate.master.id)
            .await?
            .map(|lease| lease.is_live(Utc::now()))
            .unwrap_or(false);

        if !lease_live && stale_secs >= fail_after {
            return self.mark_failed(candidate).await;
        }
        if lease_live && stale_secs >= force_after {
            return self.force_cancel(candidate).await;
        }
        debug!(lease_live, fail_after, force_after, "Stale flow left alone");
        Ok(Reclamation::LeftAlone)
    }

    async fn mark_failed(&self, candidate: &StuckFlowCandidate) -> Result<Reclamation> {
        match self
            .store
            .update_lifecycle(
                candidate.master.id,
                candidate.master.version,
                LifecycleStatus::Failed,
                Some("stuck_no_executor"),
            )
            .await
        {
            Ok(_) => {
                warn!(
                    stale_for_secs = candidate.stale_for_secs,
                    "Stuck flow without executor marked failed"
                );
                self.record_phase_failure(candidate).await;
                self.publish(candidate, "marked_failed");
                Ok(Reclamation::MarkedFailed)
            }
            Err(StoreError::VersionConflict { .. }) | Err(StoreError::MasterNotFound { .. }) => {
                debug!("Flow settled concurrently, reclamation skipped");
                Ok(Reclamation::LeftAlone)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Stamp the abandoned phase entry failed so the progress view matches
    /// the failed master. Best effort; the lifecycle write already settled.
    async fn record_phase_failure(&self, candidate: &StuckFlowCandidate) {
        let mut child = match self.store.get_child(candidate.master.id).await {
            Ok(child) => child,
            Err(error) => {
                warn!(error = %error, "Could not load child flow for phase bookkeeping");
                return;
            }
        };
        child
            .phase_progress
            .mark_failed(candidate.current_phase, "stuck_no_executor");
        if let Err(error) = self.store.save_child(&child).await {
            warn!(error = %error, "Could not mark the abandoned phase failed");
        }
    }

    async fn force_cancel(&self, candidate: &StuckFlowCandidate) -> Result<Reclamation> {
        match self
            .store
            .update_lifecycle(
                candidate.master.id,
                candidate.master.version,
                LifecycleStatus::Cancelled,
                Some("executor_stalled"),
            )
            .await
        {
            Ok(_) => {
                warn!(
                    stale_for_secs = candidate.stale_for_secs,
                    "Stuck flow with live lease force-cancelled"
                );
                self.executions.request_stop(candidate.master.id);
                self.publish(candidate, "force_cancelled");
                Ok(Reclamation::ForceCancelled)
            }
            Err(StoreError::VersionConflict { .. }) | Err(StoreError::MasterNotFound { .. }) => {
                debug!("Flow settled concurrently, reclamation skipped");
                Ok(Reclamation::LeftAlone)
            }
            Err(error) => Err(error.into()),
        }
    }

    fn publish(&self, candidate: &StuckFlowCandidate, action: &str) {
        self.events.publish(FlowLifecycleEvent::new(
            candidate.master.id,
            candidate.master.tenant_id.clone(),
            candidate.master.workflow_type,
            FlowEventKind::FlowReclaimed {
                action: action.to_string(),
            },
        ));
    }
}
