use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    future::Future,
    sync::Arc,
};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{
    GlobalSyncConfig, NamespaceSyncConfig, PeerError, ProofResponse, ShutdownSignal,
    SyncDirection, SyncError, SyncLogEntry, SyncLogKey, SyncLogQuery, SyncPolicy, SyncStatus,
    SyncerConfig, UniverseClient, UniverseServer, LOG_TARGET,
};
use crate::{
    db::{BatchedTx, FederationStore, TxOptions},
    node::ComputedNode,
    universe::{
        Identifier, LeafKey, LeafQuery, ProofType, UniverseArchive, UniverseEventType,
        UniverseRoot,
    },
};

/// A peer server and the client reaching it.
#[derive(Clone)]
pub struct Peer {
    pub host: String,
    pub client: Arc<dyn UniverseClient>,
}

impl Peer {
    pub fn new(host: impl Into<String>, client: Arc<dyn UniverseClient>) -> Self {
        Self {
            host: host.into(),
            client,
        }
    }
}

/// A failed sync unit. Failures to list the leaves of a universe carry no
/// leaf key nor direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncFailure {
    pub namespace: String,
    pub leaf_key: Option<LeafKey>,
    pub direction: Option<SyncDirection>,
    pub error: SyncError,
}

/// Outcome of one sync pass against one peer for one proof type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    pub host: String,
    pub proof_type: ProofType,
    /// Multiverse roots matched, nothing was diffed.
    pub up_to_date: bool,
    pub pulled: usize,
    pub pushed: usize,
    /// Units the policy of their universe doesn't allow. They get no log row.
    pub denied: usize,
    /// Units not run this pass: already COMPLETE, waiting for their backoff or
    /// out of attempts.
    pub deferred: usize,
    pub failures: Vec<SyncFailure>,
    pub cancelled: bool,
}

impl SyncReport {
    fn new(host: &str, proof_type: ProofType) -> Self {
        Self {
            host: host.to_string(),
            proof_type,
            up_to_date: false,
            pulled: 0,
            pushed: 0,
            denied: 0,
            deferred: 0,
            failures: Vec::new(),
            cancelled: false,
        }
    }

    /// Ran to the end without any failure.
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }
}

#[derive(Clone, Debug)]
struct SyncUnit {
    id: Identifier,
    leaf_key: LeafKey,
    direction: SyncDirection,
    /// Universe root the peer announced for `id` when the pass was planned.
    peer_root: Option<ComputedNode<32>>,
}

/// Runs sync passes between the local [`UniverseArchive`] and its peers, and
/// manages the server registry and sync policies they rely on.
pub struct FederationSyncer<D: BatchedTx> {
    archive: UniverseArchive<D>,
    config: Arc<SyncerConfig>,
}

impl<D: BatchedTx> Clone for FederationSyncer<D> {
    fn clone(&self) -> Self {
        Self {
            archive: self.archive.clone(),
            config: self.config.clone(),
        }
    }
}

impl<D: BatchedTx> FederationSyncer<D> {
    pub fn new(archive: UniverseArchive<D>, config: SyncerConfig) -> Self {
        Self {
            archive,
            config: Arc::new(config),
        }
    }

    pub fn archive(&self) -> &UniverseArchive<D> {
        &self.archive
    }

    pub fn config(&self) -> &SyncerConfig {
        &self.config
    }

    fn db(&self) -> &Arc<D> {
        self.archive.db()
    }

    /// Registers `host`, returning its id. Registering it again is a no-op.
    pub fn add_server(&self, host: &str) -> Result<i64, SyncError> {
        let id = self
            .db()
            .execute(&TxOptions::default(), |tx| tx.upsert_server(host))?;
        info!(target: LOG_TARGET, host, id, "universe server added");
        Ok(id)
    }

    pub fn servers(&self) -> Result<Vec<UniverseServer>, SyncError> {
        Ok(self
            .db()
            .execute(&TxOptions::read_only(), |tx| tx.fetch_servers())?)
    }

    pub fn server(&self, host: &str) -> Result<Option<UniverseServer>, SyncError> {
        Ok(self
            .servers()?
            .into_iter()
            .find(|server| server.host == host))
    }

    /// Returns whether `host` was registered. Its sync log is kept.
    pub fn remove_server(&self, host: &str) -> Result<bool, SyncError> {
        let removed = self
            .db()
            .execute(&TxOptions::default(), |tx| tx.delete_server(host))?;
        if removed {
            info!(target: LOG_TARGET, host, "universe server removed");
        }
        Ok(removed)
    }

    pub fn set_global_config(&self, config: GlobalSyncConfig) -> Result<(), SyncError> {
        Ok(self.db().execute(&TxOptions::default(), |tx| {
            tx.upsert_global_sync_config(config.clone())
        })?)
    }

    pub fn global_configs(&self) -> Result<Vec<GlobalSyncConfig>, SyncError> {
        Ok(self
            .db()
            .execute(&TxOptions::read_only(), |tx| tx.fetch_global_sync_configs())?)
    }

    pub fn set_namespace_config(&self, config: NamespaceSyncConfig) -> Result<(), SyncError> {
        Ok(self.db().execute(&TxOptions::default(), |tx| {
            tx.upsert_namespace_sync_config(config.clone())
        })?)
    }

    pub fn namespace_configs(&self) -> Result<Vec<NamespaceSyncConfig>, SyncError> {
        Ok(self
            .db()
            .execute(&TxOptions::read_only(), |tx| tx.fetch_namespace_sync_configs())?)
    }

    /// Effective policy of universe `id`.
    pub fn policy(&self, id: &Identifier) -> Result<SyncPolicy, SyncError> {
        let (global, namespaced) = self.policies()?;
        Ok(SyncPolicy::resolve(id, &global, &namespaced))
    }

    fn policies(&self) -> Result<(Vec<GlobalSyncConfig>, Vec<NamespaceSyncConfig>), SyncError> {
        Ok(self.db().execute(&TxOptions::read_only(), |tx| {
            Ok::<_, SyncError>((
                tx.fetch_global_sync_configs()?,
                tx.fetch_namespace_sync_configs()?,
            ))
        })?)
    }

    pub fn sync_log(&self, query: &SyncLogQuery) -> Result<Vec<SyncLogEntry>, SyncError> {
        Ok(self
            .db()
            .execute(&TxOptions::read_only(), |tx| tx.query_sync_log(query))?)
    }

    /// Syncs the universes of `proof_type` with `peer`, which must be a
    /// registered server.
    ///
    /// Failures of single leaves are recorded in the sync log and the report
    /// without stopping the pass. A universe whose leaves the peer fails to
    /// list has no leaf to log against: it only shows up in the report, with
    /// no leaf key, and keeps the pass from counting as clean. A triggered `signal` stops the pass: the
    /// leaf being synced stays IN_PROGRESS and the ones not reached stay
    /// PENDING, to be picked up by a later pass.
    pub async fn run_sync_pass(
        &self,
        peer: &Peer,
        proof_type: ProofType,
        mut signal: ShutdownSignal,
    ) -> Result<SyncReport, SyncError> {
        let server = self
            .server(&peer.host)?
            .ok_or_else(|| SyncError::UnknownServer(peer.host.clone()))?;
        let mut report = SyncReport::new(&peer.host, proof_type);
        debug!(target: LOG_TARGET, host = %peer.host, %proof_type, "starting sync pass");

        let units = match self.plan(peer, proof_type, &mut signal, &mut report).await {
            Ok(units) => units,
            Err(SyncError::Cancelled) => {
                report.cancelled = true;
                return self.finish(&server, report);
            }
            Err(err) => return Err(err),
        };
        let entries = self.open_entries(&server, &units, &mut report)?;

        for (unit, mut entry) in entries {
            if signal.is_triggered() {
                report.cancelled = true;
                break;
            }
            entry.start(Utc::now())?;
            self.save_entry(&mut entry)?;

            let result = match unit.direction {
                SyncDirection::Pull => self.pull(peer, &unit, &mut signal).await,
                SyncDirection::Push => self.push(peer, &unit, &mut signal).await,
            };
            match result {
                Ok(()) => {
                    entry.complete(Utc::now())?;
                    self.save_entry(&mut entry)?;
                    match unit.direction {
                        SyncDirection::Pull => report.pulled += 1,
                        SyncDirection::Push => report.pushed += 1,
                    }
                }
                Err(SyncError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(error) => {
                    entry.fail(Utc::now())?;
                    self.save_entry(&mut entry)?;
                    warn!(
                        target: LOG_TARGET,
                        host = %peer.host,
                        namespace = entry.namespace(),
                        direction = %unit.direction,
                        attempt = entry.attempt_counter(),
                        %error,
                        "proof sync failed"
                    );
                    report.failures.push(SyncFailure {
                        namespace: entry.namespace().to_string(),
                        leaf_key: Some(unit.leaf_key),
                        direction: Some(unit.direction),
                        error,
                    });
                }
            }
        }

        self.finish(&server, report)
    }

    /// Runs a pass per configured proof type against every peer, one task per
    /// peer. A peer whose pass returns an error is not synced for the
    /// remaining proof types.
    pub async fn sync_all(
        &self,
        peers: Vec<Peer>,
        signal: ShutdownSignal,
    ) -> Vec<(String, Result<Vec<SyncReport>, SyncError>)>
    where
        D: 'static,
    {
        let mut handles = Vec::with_capacity(peers.len());
        for peer in peers {
            let syncer = self.clone();
            let signal = signal.clone();
            let host = peer.host.clone();
            let handle = tokio::spawn(async move {
                let mut reports = Vec::new();
                for proof_type in syncer.config.proof_types.iter().copied() {
                    let report = syncer
                        .run_sync_pass(&peer, proof_type, signal.clone())
                        .await?;
                    let cancelled = report.cancelled;
                    reports.push(report);
                    if cancelled {
                        break;
                    }
                }
                Ok::<_, SyncError>(reports)
            });
            handles.push((host, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (host, handle) in handles {
            let result = handle
                .await
                .unwrap_or_else(|err| Err(SyncError::Task(err.to_string())));
            results.push((host, result));
        }
        results
    }

    /// Diffs the universes of `proof_type` against the peer, returning the
    /// units the policy allows.
    async fn plan(
        &self,
        peer: &Peer,
        proof_type: ProofType,
        signal: &mut ShutdownSignal,
        report: &mut SyncReport,
    ) -> Result<Vec<SyncUnit>, SyncError> {
        let remote_root = self
            .call(signal, peer.client.multiverse_root(proof_type))
            .await?;
        let local_root = self.archive.multiverse_root(proof_type)?;
        if remote_root == local_root {
            report.up_to_date = true;
            return Ok(Vec::new());
        }

        let remote = by_namespace(
            self.call(signal, peer.client.universe_roots(proof_type))
                .await?
                .into_iter()
                .filter(|root| root.id.proof_type == proof_type),
        );
        let local = by_namespace(self.archive.multiverse_leaves(proof_type)?);
        let (global, namespaced) = self.policies()?;

        let namespaces: BTreeSet<&String> = remote.keys().chain(local.keys()).collect();
        let mut units = Vec::new();
        for namespace in namespaces {
            let local_root = local.get(namespace);
            let remote_root = remote.get(namespace);
            if let (Some(local_root), Some(remote_root)) = (local_root, remote_root) {
                if local_root.root == remote_root.root {
                    continue;
                }
            }
            let Some(id) = local_root.or(remote_root).map(|root| root.id.clone()) else {
                continue;
            };

            let remote_keys = match remote_root {
                Some(_) => match self.call(signal, peer.client.leaf_keys(&id)).await {
                    Ok(keys) => keys,
                    Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                    Err(error) => {
                        warn!(
                            target: LOG_TARGET,
                            host = %peer.host,
                            %namespace,
                            %error,
                            "failed to list peer leaves"
                        );
                        report.failures.push(SyncFailure {
                            namespace: namespace.clone(),
                            leaf_key: None,
                            direction: None,
                            error,
                        });
                        continue;
                    }
                }
                None => Vec::new(),
            };
            let local_keys = match local_root {
                Some(_) => self.archive.fetch_leaf_keys(&id, &LeafQuery::default())?,
                None => Vec::new(),
            };

            let remote_set: HashSet<[u8; 32]> = remote_keys.iter().map(LeafKey::universe_key).collect();
            let local_set: HashSet<[u8; 32]> = local_keys.iter().map(LeafKey::universe_key).collect();
            let pulls = remote_keys
                .into_iter()
                .filter(|key| !local_set.contains(&key.universe_key()))
                .map(|key| (key, SyncDirection::Pull));
            let pushes = local_keys
                .into_iter()
                .filter(|key| !remote_set.contains(&key.universe_key()))
                .map(|key| (key, SyncDirection::Push));

            let policy = SyncPolicy::resolve(&id, &global, &namespaced);
            for (leaf_key, direction) in pulls.chain(pushes).collect::<Vec<_>>() {
                if !policy.allows(direction) {
                    debug!(
                        target: LOG_TARGET,
                        host = %peer.host,
                        %namespace,
                        %direction,
                        "sync denied by policy"
                    );
                    report.denied += 1;
                    continue;
                }
                units.push(SyncUnit {
                    id: id.clone(),
                    leaf_key,
                    direction,
                    peer_root: remote_root.map(|root| root.root),
                });
            }
        }
        Ok(units)
    }

    /// Loads or creates the log row of every unit, in one unit of work, and
    /// keeps the ones to run this pass as PENDING or IN_PROGRESS.
    fn open_entries(
        &self,
        server: &UniverseServer,
        units: &[SyncUnit],
        report: &mut SyncReport,
    ) -> Result<Vec<(SyncUnit, SyncLogEntry)>, SyncError> {
        let backoff = &self.config.backoff;
        let max_attempts = self.config.max_attempts;
        let (entries, deferred) = self.db().execute(&TxOptions::default(), |tx| {
            let now = Utc::now();
            let mut entries = Vec::new();
            let mut deferred = 0;
            for unit in units {
                let key = SyncLogKey {
                    namespace: unit.id.namespace(),
                    universe_key: unit.leaf_key.universe_key(),
                    server_id: server.id,
                    direction: unit.direction,
                };
                let mut entry = match tx.fetch_sync_log(&key)? {
                    Some(entry) => entry,
                    None => SyncLogEntry::new(
                        key.namespace,
                        unit.leaf_key.clone(),
                        server.id,
                        unit.direction,
                        now,
                    ),
                };
                match entry.status() {
                    SyncStatus::Pending | SyncStatus::InProgress => {}
                    SyncStatus::Failed if entry.retry_due(backoff, max_attempts, now) => {
                        entry.retry(now)?;
                    }
                    SyncStatus::Failed | SyncStatus::Complete => {
                        deferred += 1;
                        continue;
                    }
                }
                let id = tx.upsert_sync_log(&entry)?;
                entry.set_id(id);
                entries.push((unit.clone(), entry));
            }
            Ok::<_, SyncError>((entries, deferred))
        })?;
        report.deferred += deferred;
        Ok(entries)
    }

    fn save_entry(&self, entry: &mut SyncLogEntry) -> Result<(), SyncError> {
        let id = self
            .db()
            .execute(&TxOptions::default(), |tx| tx.upsert_sync_log(entry))?;
        entry.set_id(id);
        Ok(())
    }

    async fn pull(
        &self,
        peer: &Peer,
        unit: &SyncUnit,
        signal: &mut ShutdownSignal,
    ) -> Result<(), SyncError> {
        let response = self
            .call(signal, peer.client.fetch_proof(&unit.id, &unit.leaf_key))
            .await?;
        // The proof must open the root announced for the universe, not just
        // the one shipped alongside it.
        let announced = unit.peer_root == Some(response.universe_root);
        if !announced || response.verify(&unit.leaf_key).is_err() {
            return Err(SyncError::VerificationFailed(format!(
                "{}/{}",
                unit.id.namespace(),
                hex::encode(unit.leaf_key.universe_key())
            )));
        }
        self.archive.register_leaf_with(
            &unit.id,
            &unit.leaf_key,
            &response.leaf,
            UniverseEventType::Sync,
        )?;
        Ok(())
    }

    async fn push(
        &self,
        peer: &Peer,
        unit: &SyncUnit,
        signal: &mut ShutdownSignal,
    ) -> Result<(), SyncError> {
        let proof = self.archive.fetch_proof(&unit.id, &unit.leaf_key)?;
        self.call(
            signal,
            peer.client
                .push_proof(&unit.id, &unit.leaf_key, ProofResponse::from(&proof)),
        )
        .await
    }

    /// Bounds a peer call by the fetch timeout and the shutdown signal.
    async fn call<T, F>(&self, signal: &mut ShutdownSignal, request: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, PeerError>>,
    {
        let timeout = self.config.fetch_timeout();
        tokio::select! {
            _ = signal.wait() => Err(SyncError::Cancelled),
            result = tokio::time::timeout(timeout, request) => match result {
                Ok(result) => result.map_err(SyncError::from),
                Err(_) => Err(SyncError::Timeout(timeout)),
            }
        }
    }

    fn finish(&self, server: &UniverseServer, report: SyncReport) -> Result<SyncReport, SyncError> {
        if report.is_clean() {
            self.db().execute(&TxOptions::default(), |tx| {
                tx.update_server_sync_time(&server.host, Utc::now())
            })?;
        }
        info!(
            target: LOG_TARGET,
            host = %report.host,
            proof_type = %report.proof_type,
            up_to_date = report.up_to_date,
            pulled = report.pulled,
            pushed = report.pushed,
            denied = report.denied,
            deferred = report.deferred,
            failed = report.failures.len(),
            cancelled = report.cancelled,
            "sync pass finished"
        );
        Ok(report)
    }
}

fn by_namespace(roots: impl IntoIterator<Item = UniverseRoot>) -> BTreeMap<String, UniverseRoot> {
    roots
        .into_iter()
        .map(|root| (root.namespace(), root))
        .collect()
}
