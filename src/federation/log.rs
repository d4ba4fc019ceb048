//! Proof sync log and the per-leaf sync state machine.
//!
//! ```text
//! PENDING ──start──▶ IN_PROGRESS ──complete──▶ COMPLETE
//!    ▲                 │      ▲
//!    │               fail   resume (after a cancelled pass)
//!    │                 ▼      │
//!    └────retry──── FAILED    └─ IN_PROGRESS
//! ```
//!
//! COMPLETE is terminal. Transitions go through the methods of
//! [`SyncLogEntry`]; its status can't be set directly.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::BackoffPolicy;
use crate::universe::LeafKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Local leaf sent to the peer.
    Push,
    /// Peer leaf inserted locally.
    Pull,
}

impl Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Push => "push",
            Self::Pull => "pull",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl SyncStatus {
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, InProgress)
                | (InProgress, Complete)
                | (InProgress, Failed)
                | (Failed, Pending)
        )
    }

    pub fn transition(self, next: SyncStatus) -> Result<SyncStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        })
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("illegal sync status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SyncStatus,
    pub to: SyncStatus,
}

/// Identity of a sync log row: one per leaf, peer server and direction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncLogKey {
    pub namespace: String,
    pub universe_key: [u8; 32],
    pub server_id: i64,
    pub direction: SyncDirection,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncLogEntry {
    id: Option<i64>,
    key: SyncLogKey,
    leaf_key: LeafKey,
    status: SyncStatus,
    attempt_counter: u32,
    timestamp: DateTime<Utc>,
}

impl SyncLogEntry {
    pub fn new(
        namespace: impl Into<String>,
        leaf_key: LeafKey,
        server_id: i64,
        direction: SyncDirection,
        now: DateTime<Utc>,
    ) -> Self {
        let key = SyncLogKey {
            namespace: namespace.into(),
            universe_key: leaf_key.universe_key(),
            server_id,
            direction,
        };
        Self {
            id: None,
            key,
            leaf_key,
            status: SyncStatus::Pending,
            attempt_counter: 0,
            timestamp: now,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    pub fn key(&self) -> &SyncLogKey {
        &self.key
    }

    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    pub fn server_id(&self) -> i64 {
        self.key.server_id
    }

    pub fn direction(&self) -> SyncDirection {
        self.key.direction
    }

    pub fn leaf_key(&self) -> &LeafKey {
        &self.leaf_key
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn attempt_counter(&self) -> u32 {
        self.attempt_counter
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn move_to(&mut self, next: SyncStatus, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.status = self.status.transition(next)?;
        self.timestamp = now;
        Ok(())
    }

    /// Starts (or resumes) an attempt, counting it.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.move_to(SyncStatus::InProgress, now)?;
        self.attempt_counter = self.attempt_counter.saturating_add(1);
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.move_to(SyncStatus::Complete, now)
    }

    pub fn fail(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.move_to(SyncStatus::Failed, now)
    }

    pub fn retry(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.move_to(SyncStatus::Pending, now)
    }

    /// Whether a failed entry may be retried at `now`.
    pub fn retry_due(&self, backoff: &BackoffPolicy, max_attempts: u32, now: DateTime<Utc>) -> bool {
        if self.status != SyncStatus::Failed || self.attempt_counter >= max_attempts {
            return false;
        }
        let wait = backoff.delay(self.attempt_counter);
        match chrono::Duration::from_std(wait) {
            Ok(wait) => self.timestamp + wait <= now,
            Err(_) => false,
        }
    }
}

/// Filter over the sync log. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncLogQuery {
    pub server_id: Option<i64>,
    pub namespace: Option<String>,
    pub status: Option<SyncStatus>,
    pub direction: Option<SyncDirection>,
}

impl SyncLogQuery {
    pub fn matches(&self, entry: &SyncLogEntry) -> bool {
        self.server_id.map_or(true, |id| id == entry.server_id())
            && self
                .namespace
                .as_deref()
                .map_or(true, |namespace| namespace == entry.namespace())
            && self.status.map_or(true, |status| status == entry.status())
            && self
                .direction
                .map_or(true, |direction| direction == entry.direction())
    }
}

#[cfg(test)]
mod test {
    use super::{SyncDirection, SyncLogEntry, SyncLogQuery, SyncStatus};
    use crate::{federation::BackoffPolicy, universe::LeafKey};
    use chrono::{Duration, Utc};

    fn entry() -> SyncLogEntry {
        SyncLogEntry::new(
            "issuance-00",
            LeafKey::new(vec![1; 36], vec![2; 32]),
            1,
            SyncDirection::Pull,
            Utc::now(),
        )
    }

    #[test]
    fn test_happy_path() {
        let mut entry = entry();
        let now = Utc::now();
        assert_eq!(entry.status(), SyncStatus::Pending);
        entry.start(now).unwrap();
        assert_eq!(entry.status(), SyncStatus::InProgress);
        assert_eq!(entry.attempt_counter(), 1);
        entry.complete(now).unwrap();
        assert!(entry.status().is_terminal());
    }

    #[test]
    fn test_complete_is_terminal() {
        let mut entry = entry();
        let now = Utc::now();
        entry.start(now).unwrap();
        entry.complete(now).unwrap();
        assert!(entry.start(now).is_err());
        assert!(entry.fail(now).is_err());
        assert!(entry.retry(now).is_err());
        assert_eq!(entry.status(), SyncStatus::Complete);
        assert_eq!(entry.attempt_counter(), 1);
    }

    #[test]
    fn test_pending_cannot_finish_without_starting() {
        let mut entry = entry();
        let now = Utc::now();
        assert!(entry.complete(now).is_err());
        assert!(entry.fail(now).is_err());
        assert!(entry.retry(now).is_err());
    }

    #[test]
    fn test_failed_retry_cycle() {
        let mut entry = entry();
        let now = Utc::now();
        entry.start(now).unwrap();
        entry.fail(now).unwrap();
        assert!(entry.start(now).is_err());
        entry.retry(now).unwrap();
        entry.start(now).unwrap();
        assert_eq!(entry.attempt_counter(), 2);
    }

    #[test]
    fn test_retry_due_honours_backoff_and_attempts() {
        let backoff = BackoffPolicy {
            initial_ms: 1_000,
            max_ms: 60_000,
            multiplier: 2,
        };
        let mut entry = entry();
        let then = Utc::now();
        entry.start(then).unwrap();
        entry.fail(then).unwrap();
        assert!(!entry.retry_due(&backoff, 5, then));
        assert!(entry.retry_due(&backoff, 5, then + Duration::seconds(1)));
        assert!(!entry.retry_due(&backoff, 1, then + Duration::hours(1)));
    }

    #[test]
    fn test_query_matches() {
        let entry = entry();
        assert!(SyncLogQuery::default().matches(&entry));
        let query = SyncLogQuery {
            server_id: Some(1),
            direction: Some(SyncDirection::Pull),
            status: Some(SyncStatus::Pending),
            namespace: Some("issuance-00".to_string()),
        };
        assert!(query.matches(&entry));
        let query = SyncLogQuery {
            direction: Some(SyncDirection::Push),
            ..Default::default()
        };
        assert!(!query.matches(&entry));
    }
}
