use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    ops::{Deref, RangeBounds},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::debug;

use super::{
    BatchedTx, FederationStore, MultiverseStore, StoredNode, TreeStore, TxOptions, UniverseStore,
};
use crate::{
    error::StoreError,
    federation::{
        GlobalSyncConfig, NamespaceSyncConfig, SyncLogEntry, SyncLogKey, SyncLogQuery,
        UniverseServer,
    },
    universe::{
        Identifier, LeafQuery, MultiverseLeafRow, MultiverseRootRow, NewUniverseLeaf, ProofType,
        UniverseEventRow, UniverseEventType, UniverseLeafRow, UniverseRootRow,
    },
};

const LOG_TARGET: &str = "universe::db";

/// How many times a unit of work is replayed after losing a commit race.
const MAX_COMMIT_ATTEMPTS: usize = 10;

type NodeKey = (String, [u8; 32]);

#[derive(Debug, Default)]
struct Tables {
    nodes: BTreeMap<NodeKey, StoredNode<32>>,
    roots: BTreeMap<String, [u8; 32]>,
    universe_roots: BTreeMap<String, UniverseRootRow>,
    universe_leaves: BTreeMap<NodeKey, UniverseLeafRow>,
    universe_events: BTreeMap<i64, UniverseEventRow>,
    multiverse_roots: BTreeMap<ProofType, MultiverseRootRow>,
    multiverse_leaves: BTreeMap<(ProofType, [u8; 32]), MultiverseLeafRow>,
    servers: BTreeMap<String, UniverseServer>,
    sync_log: BTreeMap<SyncLogKey, SyncLogEntry>,
    global_configs: BTreeMap<ProofType, GlobalSyncConfig>,
    namespace_configs: BTreeMap<String, NamespaceSyncConfig>,
}

/// Pending writes of a unit of work, `None` marking a deleted row.
#[derive(Debug, Default)]
struct Writes {
    nodes: BTreeMap<NodeKey, Option<StoredNode<32>>>,
    roots: BTreeMap<String, Option<[u8; 32]>>,
    universe_roots: BTreeMap<String, Option<UniverseRootRow>>,
    universe_leaves: BTreeMap<NodeKey, Option<UniverseLeafRow>>,
    universe_events: BTreeMap<i64, Option<UniverseEventRow>>,
    multiverse_roots: BTreeMap<ProofType, Option<MultiverseRootRow>>,
    multiverse_leaves: BTreeMap<(ProofType, [u8; 32]), Option<MultiverseLeafRow>>,
    servers: BTreeMap<String, Option<UniverseServer>>,
    sync_log: BTreeMap<SyncLogKey, Option<SyncLogEntry>>,
    global_configs: BTreeMap<ProofType, Option<GlobalSyncConfig>>,
    namespace_configs: BTreeMap<String, Option<NamespaceSyncConfig>>,
}

impl Writes {
    fn apply(self, tables: &mut Tables) {
        apply(self.nodes, &mut tables.nodes);
        apply(self.roots, &mut tables.roots);
        apply(self.universe_roots, &mut tables.universe_roots);
        apply(self.universe_leaves, &mut tables.universe_leaves);
        apply(self.universe_events, &mut tables.universe_events);
        apply(self.multiverse_roots, &mut tables.multiverse_roots);
        apply(self.multiverse_leaves, &mut tables.multiverse_leaves);
        apply(self.servers, &mut tables.servers);
        apply(self.sync_log, &mut tables.sync_log);
        apply(self.global_configs, &mut tables.global_configs);
        apply(self.namespace_configs, &mut tables.namespace_configs);
    }
}

fn apply<K: Ord, V>(writes: BTreeMap<K, Option<V>>, base: &mut BTreeMap<K, V>) {
    for (key, value) in writes {
        match value {
            Some(value) => base.insert(key, value),
            None => base.remove(&key),
        };
    }
}

fn lookup<K: Ord, V: Clone>(
    writes: Option<&BTreeMap<K, Option<V>>>,
    base: &BTreeMap<K, V>,
    key: &K,
) -> Option<V> {
    match writes.and_then(|writes| writes.get(key)) {
        Some(value) => value.clone(),
        None => base.get(key).cloned(),
    }
}

fn scan<K, V, R>(writes: Option<&BTreeMap<K, Option<V>>>, base: &BTreeMap<K, V>, range: R) -> Vec<V>
where
    K: Ord + Clone,
    V: Clone,
    R: RangeBounds<K> + Clone,
{
    let mut merged: BTreeMap<K, V> = base
        .range(range.clone())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if let Some(writes) = writes {
        for (key, value) in writes.range(range) {
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
    }
    merged.into_values().collect()
}

fn namespace_range(namespace: &str) -> std::ops::RangeInclusive<NodeKey> {
    (namespace.to_string(), [0; 32])..=(namespace.to_string(), [0xff; 32])
}

enum Base<'a> {
    Snapshot(&'a Tables),
    Locked(RwLockReadGuard<'a, Tables>),
}

impl Deref for Base<'_> {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        match self {
            Self::Snapshot(tables) => tables,
            Self::Locked(guard) => guard,
        }
    }
}

/// In-memory store with the same transactional behaviour as a database
/// backend: writes are buffered until the unit of work commits, read-only
/// units of work see one snapshot, and writers of a namespace are serialized.
#[derive(Clone, Default)]
pub struct MemoryDb {
    tables: Arc<RwLock<Tables>>,
    namespace_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn namespace_lock(&self, namespace: &str) -> Arc<Mutex<()>> {
        self.namespace_locks
            .lock()
            .entry(namespace.to_string())
            .or_default()
            .clone()
    }

    /// Runs `f` holding the lock of every namespace, taken in order.
    fn with_locks<R>(&self, namespaces: &[String], f: impl FnOnce() -> R) -> R {
        match namespaces.split_first() {
            None => f(),
            Some((first, rest)) => {
                let lock = self.namespace_lock(first);
                let _guard = lock.lock();
                self.with_locks(rest, f)
            }
        }
    }
}

impl BatchedTx for MemoryDb {
    type Tx = MemoryTx;

    fn execute<T, E, F>(&self, opts: &TxOptions, mut txn: F) -> Result<T, E>
    where
        F: FnMut(&mut Self::Tx) -> Result<T, E>,
        E: From<StoreError>,
    {
        if opts.is_read_only() {
            let mut tx = MemoryTx {
                tables: self.tables.clone(),
                snapshot: Some(Box::new(self.tables.read_arc())),
                writes: None,
                observed_roots: RefCell::default(),
                next_id: self.next_id.clone(),
            };
            return txn(&mut tx);
        }

        self.with_locks(opts.namespaces(), || {
            let mut conflict = String::new();
            for attempt in 1..=MAX_COMMIT_ATTEMPTS {
                let mut tx = MemoryTx {
                    tables: self.tables.clone(),
                    snapshot: None,
                    writes: Some(Writes::default()),
                    observed_roots: RefCell::default(),
                    next_id: self.next_id.clone(),
                };
                let out = txn(&mut tx)?;
                match tx.commit() {
                    Ok(()) => return Ok(out),
                    Err(StoreError::ConflictingWrite(namespace)) => {
                        debug!(
                            target: LOG_TARGET,
                            %namespace,
                            attempt,
                            "conflicting write, replaying unit of work"
                        );
                        conflict = namespace;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            Err(StoreError::ConflictingWrite(conflict).into())
        })
    }
}

/// Unit of work over a [`MemoryDb`].
pub struct MemoryTx {
    tables: Arc<RwLock<Tables>>,
    snapshot: Option<Box<dyn Deref<Target = Tables>>>,
    writes: Option<Writes>,
    /// Root of each namespace as first seen by this unit of work.
    observed_roots: RefCell<BTreeMap<String, Option<[u8; 32]>>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryTx {
    fn base(&self) -> Base<'_> {
        match &self.snapshot {
            Some(snapshot) => Base::Snapshot(&***snapshot),
            None => Base::Locked(self.tables.read()),
        }
    }

    fn writes(&self) -> Option<&Writes> {
        self.writes.as_ref()
    }

    fn writes_mut(&mut self) -> Result<&mut Writes, StoreError> {
        self.writes.as_mut().ok_or(StoreError::ReadOnly)
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn observe_root(&self, namespace: &str) {
        if self.writes.is_none() {
            return;
        }
        let mut observed = self.observed_roots.borrow_mut();
        if !observed.contains_key(namespace) {
            let root = self.base().roots.get(namespace).copied();
            observed.insert(namespace.to_string(), root);
        }
    }

    fn commit(self) -> Result<(), StoreError> {
        let Some(writes) = self.writes else {
            return Ok(());
        };
        let mut tables = self.tables.write();
        for (namespace, seen) in self.observed_roots.into_inner() {
            if tables.roots.get(&namespace) != seen.as_ref() {
                return Err(StoreError::ConflictingWrite(namespace));
            }
        }
        writes.apply(&mut tables);
        Ok(())
    }
}

impl TreeStore<32> for MemoryTx {
    fn fetch_node(
        &self,
        namespace: &str,
        hash: &[u8; 32],
    ) -> Result<Option<StoredNode<32>>, StoreError> {
        let key = (namespace.to_string(), *hash);
        Ok(lookup(
            self.writes().map(|w| &w.nodes),
            &self.base().nodes,
            &key,
        ))
    }

    fn insert_node(
        &mut self,
        namespace: &str,
        hash: [u8; 32],
        node: StoredNode<32>,
    ) -> Result<(), StoreError> {
        if self.fetch_node(namespace, &hash)?.is_some() {
            return Ok(());
        }
        self.writes_mut()?
            .nodes
            .insert((namespace.to_string(), hash), Some(node));
        Ok(())
    }

    fn delete_node(&mut self, namespace: &str, hash: &[u8; 32]) -> Result<(), StoreError> {
        self.writes_mut()?
            .nodes
            .insert((namespace.to_string(), *hash), None);
        Ok(())
    }

    fn node_hashes(&self, namespace: &str) -> Result<Vec<[u8; 32]>, StoreError> {
        let range = namespace_range(namespace);
        let base = self.base();
        let mut hashes: BTreeMap<[u8; 32], bool> = base
            .nodes
            .range(range.clone())
            .map(|((_, hash), _)| (*hash, true))
            .collect();
        if let Some(writes) = self.writes() {
            for ((_, hash), node) in writes.nodes.range(range) {
                hashes.insert(*hash, node.is_some());
            }
        }
        Ok(hashes
            .into_iter()
            .filter_map(|(hash, present)| present.then_some(hash))
            .collect())
    }

    fn root_hash(&self, namespace: &str) -> Result<Option<[u8; 32]>, StoreError> {
        self.observe_root(namespace);
        Ok(lookup(
            self.writes().map(|w| &w.roots),
            &self.base().roots,
            &namespace.to_string(),
        ))
    }

    fn update_root(&mut self, namespace: &str, hash: [u8; 32]) -> Result<(), StoreError> {
        self.observe_root(namespace);
        self.writes_mut()?
            .roots
            .insert(namespace.to_string(), Some(hash));
        Ok(())
    }
}

impl UniverseStore for MemoryTx {
    fn upsert_universe_root(
        &mut self,
        namespace: &str,
        id: &Identifier,
    ) -> Result<i64, StoreError> {
        if let Some(row) = self.fetch_universe_root(namespace)? {
            return Ok(row.id);
        }
        let row = UniverseRootRow {
            id: self.next_id(),
            namespace: namespace.to_string(),
            identifier: id.clone(),
        };
        let id = row.id;
        self.writes_mut()?
            .universe_roots
            .insert(namespace.to_string(), Some(row));
        Ok(id)
    }

    fn fetch_universe_root(&self, namespace: &str) -> Result<Option<UniverseRootRow>, StoreError> {
        Ok(lookup(
            self.writes().map(|w| &w.universe_roots),
            &self.base().universe_roots,
            &namespace.to_string(),
        ))
    }

    fn fetch_universe_roots(
        &self,
        proof_type: Option<ProofType>,
    ) -> Result<Vec<UniverseRootRow>, StoreError> {
        let rows = scan(
            self.writes().map(|w| &w.universe_roots),
            &self.base().universe_roots,
            ..,
        );
        Ok(rows
            .into_iter()
            .filter(|row| proof_type.map_or(true, |pt| row.identifier.proof_type == pt))
            .collect())
    }

    fn upsert_universe_leaf(&mut self, leaf: NewUniverseLeaf) -> Result<i64, StoreError> {
        let universe_key = leaf.leaf_key.universe_key();
        if let Some(row) = self.fetch_universe_leaf(&leaf.namespace, &universe_key)? {
            return Ok(row.id);
        }
        let row = UniverseLeafRow {
            id: self.next_id(),
            universe_root_id: leaf.universe_root_id,
            namespace: leaf.namespace.clone(),
            leaf_key: leaf.leaf_key,
            universe_key,
            inserted_at: leaf.inserted_at,
        };
        let id = row.id;
        self.writes_mut()?
            .universe_leaves
            .insert((leaf.namespace, universe_key), Some(row));
        Ok(id)
    }

    fn fetch_universe_leaf(
        &self,
        namespace: &str,
        universe_key: &[u8; 32],
    ) -> Result<Option<UniverseLeafRow>, StoreError> {
        Ok(lookup(
            self.writes().map(|w| &w.universe_leaves),
            &self.base().universe_leaves,
            &(namespace.to_string(), *universe_key),
        ))
    }

    fn query_universe_leaves(
        &self,
        namespace: &str,
        query: &LeafQuery,
    ) -> Result<Vec<UniverseLeafRow>, StoreError> {
        let mut rows = scan(
            self.writes().map(|w| &w.universe_leaves),
            &self.base().universe_leaves,
            namespace_range(namespace),
        );
        rows.sort_by_key(|row| row.id);
        Ok(rows
            .into_iter()
            .filter(|row| query.matches_time(&row.inserted_at))
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn insert_universe_event(
        &mut self,
        universe_root_id: i64,
        event_type: UniverseEventType,
        event_time: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let row = UniverseEventRow {
            id: self.next_id(),
            universe_root_id,
            event_type,
            event_time,
        };
        let id = row.id;
        self.writes_mut()?.universe_events.insert(id, Some(row));
        Ok(id)
    }

    fn fetch_universe_events(
        &self,
        universe_root_id: i64,
    ) -> Result<Vec<UniverseEventRow>, StoreError> {
        let rows = scan(
            self.writes().map(|w| &w.universe_events),
            &self.base().universe_events,
            ..,
        );
        Ok(rows
            .into_iter()
            .filter(|row| row.universe_root_id == universe_root_id)
            .collect())
    }
}

impl MultiverseStore for MemoryTx {
    fn upsert_multiverse_root(&mut self, proof_type: ProofType) -> Result<i64, StoreError> {
        if let Some(row) = self.fetch_multiverse_root(proof_type)? {
            return Ok(row.id);
        }
        let row = MultiverseRootRow {
            id: self.next_id(),
            namespace: crate::universe::multiverse_namespace(proof_type),
            proof_type,
        };
        let id = row.id;
        self.writes_mut()?
            .multiverse_roots
            .insert(proof_type, Some(row));
        Ok(id)
    }

    fn upsert_multiverse_leaf(
        &mut self,
        multiverse_root_id: i64,
        id: &Identifier,
    ) -> Result<i64, StoreError> {
        let key = (id.proof_type, id.bytes());
        let existing = lookup(
            self.writes().map(|w| &w.multiverse_leaves),
            &self.base().multiverse_leaves,
            &key,
        );
        if let Some(row) = existing {
            return Ok(row.id);
        }
        let row = MultiverseLeafRow {
            id: self.next_id(),
            multiverse_root_id,
            identifier: id.clone(),
            leaf_key: id.bytes(),
            leaf_namespace: id.namespace(),
        };
        let row_id = row.id;
        self.writes_mut()?.multiverse_leaves.insert(key, Some(row));
        Ok(row_id)
    }

    fn fetch_multiverse_root(
        &self,
        proof_type: ProofType,
    ) -> Result<Option<MultiverseRootRow>, StoreError> {
        Ok(lookup(
            self.writes().map(|w| &w.multiverse_roots),
            &self.base().multiverse_roots,
            &proof_type,
        ))
    }

    fn fetch_multiverse_leaves(
        &self,
        proof_type: ProofType,
    ) -> Result<Vec<MultiverseLeafRow>, StoreError> {
        Ok(scan(
            self.writes().map(|w| &w.multiverse_leaves),
            &self.base().multiverse_leaves,
            (proof_type, [0; 32])..=(proof_type, [0xff; 32]),
        ))
    }
}

impl FederationStore for MemoryTx {
    fn upsert_server(&mut self, host: &str) -> Result<i64, StoreError> {
        let existing = lookup(
            self.writes().map(|w| &w.servers),
            &self.base().servers,
            &host.to_string(),
        );
        if let Some(server) = existing {
            return Ok(server.id);
        }
        let server = UniverseServer {
            id: self.next_id(),
            host: host.to_string(),
            last_sync_time: None,
        };
        let id = server.id;
        self.writes_mut()?
            .servers
            .insert(host.to_string(), Some(server));
        Ok(id)
    }

    fn fetch_servers(&self) -> Result<Vec<UniverseServer>, StoreError> {
        let mut servers = scan(
            self.writes().map(|w| &w.servers),
            &self.base().servers,
            ..,
        );
        servers.sort_by_key(|server| server.id);
        Ok(servers)
    }

    fn update_server_sync_time(
        &mut self,
        host: &str,
        time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let existing = lookup(
            self.writes().map(|w| &w.servers),
            &self.base().servers,
            &host.to_string(),
        );
        // A server removed while it was being synced stays removed.
        if let Some(mut server) = existing {
            server.last_sync_time = Some(time);
            self.writes_mut()?
                .servers
                .insert(host.to_string(), Some(server));
        }
        Ok(())
    }

    fn delete_server(&mut self, host: &str) -> Result<bool, StoreError> {
        let existing = lookup(
            self.writes().map(|w| &w.servers),
            &self.base().servers,
            &host.to_string(),
        );
        if existing.is_none() {
            return Ok(false);
        }
        self.writes_mut()?.servers.insert(host.to_string(), None);
        Ok(true)
    }

    fn upsert_global_sync_config(&mut self, config: GlobalSyncConfig) -> Result<(), StoreError> {
        self.writes_mut()?
            .global_configs
            .insert(config.proof_type, Some(config));
        Ok(())
    }

    fn fetch_global_sync_configs(&self) -> Result<Vec<GlobalSyncConfig>, StoreError> {
        Ok(scan(
            self.writes().map(|w| &w.global_configs),
            &self.base().global_configs,
            ..,
        ))
    }

    fn upsert_namespace_sync_config(
        &mut self,
        config: NamespaceSyncConfig,
    ) -> Result<(), StoreError> {
        self.writes_mut()?
            .namespace_configs
            .insert(config.namespace(), Some(config));
        Ok(())
    }

    fn fetch_namespace_sync_configs(&self) -> Result<Vec<NamespaceSyncConfig>, StoreError> {
        Ok(scan(
            self.writes().map(|w| &w.namespace_configs),
            &self.base().namespace_configs,
            ..,
        ))
    }

    fn upsert_sync_log(&mut self, entry: &SyncLogEntry) -> Result<i64, StoreError> {
        let id = match entry.id() {
            Some(id) => id,
            None => match self.fetch_sync_log(entry.key())? {
                Some(existing) => existing.id().unwrap_or_else(|| self.next_id()),
                None => self.next_id(),
            },
        };
        let mut row = entry.clone();
        row.set_id(id);
        self.writes_mut()?
            .sync_log
            .insert(entry.key().clone(), Some(row));
        Ok(id)
    }

    fn fetch_sync_log(&self, key: &SyncLogKey) -> Result<Option<SyncLogEntry>, StoreError> {
        Ok(lookup(
            self.writes().map(|w| &w.sync_log),
            &self.base().sync_log,
            key,
        ))
    }

    fn query_sync_log(&self, query: &SyncLogQuery) -> Result<Vec<SyncLogEntry>, StoreError> {
        let mut entries: Vec<_> = scan(
            self.writes().map(|w| &w.sync_log),
            &self.base().sync_log,
            ..,
        )
        .into_iter()
        .filter(|entry| query.matches(entry))
        .collect();
        entries.sort_by_key(|entry| entry.id());
        Ok(entries)
    }
}
