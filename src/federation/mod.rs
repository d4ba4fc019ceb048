//! Federation: keeping the universes of this server in sync with peer
//! servers.
//!
//! A [`FederationSyncer`] runs sync passes against peers reached through a
//! [`UniverseClient`]. Each pass compares multiverse roots, diffs universe
//! roots and leaf keys, then pulls the leaves missing locally and pushes the
//! ones missing on the peer, as far as the [`SyncPolicy`] of each universe
//! allows. Every pulled or pushed leaf is tracked in the proof sync log.

mod client;
mod config;
mod log;
mod shutdown;
mod syncer;

pub use client::{ArchiveClient, PeerError, ProofResponse, UniverseClient};
pub use config::{BackoffPolicy, ConfigError, SyncerConfig};
pub use log::{
    InvalidTransition, SyncDirection, SyncLogEntry, SyncLogKey, SyncLogQuery, SyncStatus,
};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use syncer::{FederationSyncer, Peer, SyncFailure, SyncReport};

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    error::StoreError,
    universe::{Identifier, ProofType, UniverseError},
};

const LOG_TARGET: &str = "universe::federation";

/// A peer this server syncs with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniverseServer {
    pub id: i64,
    pub host: String,
    /// End of the last pass that finished without failures.
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// Sync policy applying to every universe of one proof type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSyncConfig {
    pub proof_type: ProofType,
    pub allow_sync_insert: bool,
    pub allow_sync_export: bool,
}

/// Sync policy of a single universe. Takes precedence over the global one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceSyncConfig {
    pub id: Identifier,
    pub allow_sync_insert: bool,
    pub allow_sync_export: bool,
}

impl NamespaceSyncConfig {
    pub fn namespace(&self) -> String {
        self.id.namespace()
    }
}

/// What sync may do with one universe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Leaves of peers may be inserted locally.
    pub allow_insert: bool,
    /// Local leaves may be sent to peers.
    pub allow_export: bool,
}

impl SyncPolicy {
    /// Namespace config, else the global config of the proof type, else
    /// deny everything.
    pub fn resolve(
        id: &Identifier,
        global: &[GlobalSyncConfig],
        namespaced: &[NamespaceSyncConfig],
    ) -> Self {
        if let Some(config) = namespaced.iter().find(|config| config.id == *id) {
            return Self {
                allow_insert: config.allow_sync_insert,
                allow_export: config.allow_sync_export,
            };
        }
        global
            .iter()
            .find(|config| config.proof_type == id.proof_type)
            .map(|config| Self {
                allow_insert: config.allow_sync_insert,
                allow_export: config.allow_sync_export,
            })
            .unwrap_or_default()
    }

    pub fn allows(&self, direction: SyncDirection) -> bool {
        match direction {
            SyncDirection::Pull => self.allow_insert,
            SyncDirection::Push => self.allow_export,
        }
    }
}

/// Errors of the federation layer. Apart from [`SyncError::UnknownServer`]
/// and the errors of the first two peer calls of a pass, they are scoped to
/// one sync unit and end up in its log row and the pass report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("peer unavailable: {0}")]
    PeerUnavailable(String),
    #[error("peer call timed out after {0:?}")]
    Timeout(Duration),
    #[error("sync pass cancelled")]
    Cancelled,
    #[error("proof for {0} does not verify against the root claimed by the peer")]
    VerificationFailed(String),
    #[error("peer rejected the request: {0}")]
    Peer(PeerError),
    #[error("unknown server `{0}`")]
    UnknownServer(String),
    #[error("sync task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
    #[error(transparent)]
    Universe(#[from] UniverseError),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        Self::Universe(err.into())
    }
}

impl From<PeerError> for SyncError {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::Unavailable(reason) => Self::PeerUnavailable(reason),
            PeerError::Timeout(after) => Self::Timeout(after),
            other => Self::Peer(other),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{GlobalSyncConfig, NamespaceSyncConfig, SyncDirection, SyncPolicy};
    use crate::universe::{Identifier, ProofType};

    #[test]
    fn test_policy_resolution_order() {
        let id = Identifier::asset([1; 32], ProofType::Issuance);
        let other = Identifier::asset([2; 32], ProofType::Issuance);
        let transfer = Identifier::asset([1; 32], ProofType::Transfer);

        assert_eq!(SyncPolicy::resolve(&id, &[], &[]), SyncPolicy::default());

        let global = [GlobalSyncConfig {
            proof_type: ProofType::Issuance,
            allow_sync_insert: true,
            allow_sync_export: true,
        }];
        let namespaced = [NamespaceSyncConfig {
            id: id.clone(),
            allow_sync_insert: false,
            allow_sync_export: true,
        }];

        let policy = SyncPolicy::resolve(&id, &global, &namespaced);
        assert!(!policy.allows(SyncDirection::Pull));
        assert!(policy.allows(SyncDirection::Push));

        let policy = SyncPolicy::resolve(&other, &global, &namespaced);
        assert!(policy.allow_insert && policy.allow_export);

        assert_eq!(
            SyncPolicy::resolve(&transfer, &global, &namespaced),
            SyncPolicy::default()
        );
    }
}
