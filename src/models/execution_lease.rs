//! # Execution Lease
//!
//! Storage-backed exclusivity for background execution. A runner must hold
//! the lease for a master flow before invoking handlers; it renews the lease
//! on a heartbeat interval and releases it when the loop exits.
//!
//! ## Overview
//!
//! Leases make "is anything actually executing this flow?" answerable across
//! process restarts and multiple orchestrator instances. An expired lease
//! means the holder died without releasing: the health monitor treats such
//! flows as stuck. A live lease held by another process makes start and
//! resume return a conflict instead of double-executing.
//!
//! Expiry is judged against the database clock at query time, so holders and
//! monitors never compare clocks across hosts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An exclusive execution claim on one master flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLease {
    pub master_flow_id: Uuid,
    /// Identity of the claiming runner, `runner-{pid}-{nonce}`.
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ExecutionLease {
    /// Whether the lease is still live at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Whether `holder_id` owns this lease and it has not expired.
    pub fn is_held_by(&self, holder_id: &str, now: DateTime<Utc>) -> bool {
        self.holder_id == holder_id && self.is_live(now)
    }

    /// Remaining lifetime, clamped to zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease_expiring_in(seconds: i64) -> (ExecutionLease, DateTime<Utc>) {
        let now = Utc::now();
        let lease = ExecutionLease {
            master_flow_id: Uuid::new_v4(),
            holder_id: "host-1234-abc".to_string(),
            acquired_at: now - Duration::seconds(30),
            heartbeat_at: now,
            expires_at: now + Duration::seconds(seconds),
        };
        (lease, now)
    }

    #[test]
    fn test_live_lease() {
        let (lease, now) = lease_expiring_in(60);
        assert!(lease.is_live(now));
        assert!(lease.is_held_by("host-1234-abc", now));
        assert!(!lease.is_held_by("other-holder", now));
        assert_eq!(lease.remaining(now), Duration::seconds(60));
    }

    #[test]
    fn test_expired_lease() {
        let (lease, now) = lease_expiring_in(-5);
        assert!(!lease.is_live(now));
        assert!(!lease.is_held_by("host-1234-abc", now));
        assert_eq!(lease.remaining(now), Duration::zero());
    }
}
