//! Storage traits and the transactional façade.
//!
//! Every persisted entity gets a narrow trait so the tree, universe and
//! federation logic stay independent of the engine holding the rows. A
//! backend hands out a single transaction type implementing all of them
//! through [`BatchedTx::execute`], which is the only way to reach the data:
//! each call is one atomic unit of work.

mod memory;

pub use memory::{MemoryDb, MemoryTx};

use chrono::{DateTime, Utc};

use crate::{
    error::StoreError,
    federation::{
        GlobalSyncConfig, NamespaceSyncConfig, SyncLogEntry, SyncLogKey, SyncLogQuery,
        UniverseServer,
    },
    node::Sum,
    universe::{
        Identifier, LeafQuery, MultiverseLeafRow, MultiverseRootRow, NewUniverseLeaf, ProofType,
        UniverseEventRow, UniverseEventType, UniverseLeafRow, UniverseRootRow,
    },
};

/// Row of the node table. Links between nodes are hashes, never references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredNode<const HASH_SIZE: usize> {
    Branch {
        left: [u8; HASH_SIZE],
        right: [u8; HASH_SIZE],
        sum: Sum,
    },
    Leaf {
        key: [u8; HASH_SIZE],
        value: Vec<u8>,
        sum: Sum,
    },
}

impl<const HASH_SIZE: usize> StoredNode<HASH_SIZE> {
    pub fn sum(&self) -> Sum {
        match self {
            Self::Branch { sum, .. } | Self::Leaf { sum, .. } => *sum,
        }
    }
}

/// Content-addressed node storage partitioned by namespace, plus the current
/// root of each namespace.
///
/// Nodes are append-only: storing a node that is already present is a no-op.
pub trait TreeStore<const HASH_SIZE: usize> {
    fn fetch_node(
        &self,
        namespace: &str,
        hash: &[u8; HASH_SIZE],
    ) -> Result<Option<StoredNode<HASH_SIZE>>, StoreError>;

    fn insert_node(
        &mut self,
        namespace: &str,
        hash: [u8; HASH_SIZE],
        node: StoredNode<HASH_SIZE>,
    ) -> Result<(), StoreError>;

    /// Only used by compaction. Deleting a node still reachable from the root
    /// corrupts the tree.
    fn delete_node(&mut self, namespace: &str, hash: &[u8; HASH_SIZE]) -> Result<(), StoreError>;

    fn node_hashes(&self, namespace: &str) -> Result<Vec<[u8; HASH_SIZE]>, StoreError>;

    /// `None` when nothing was ever inserted in the namespace.
    fn root_hash(&self, namespace: &str) -> Result<Option<[u8; HASH_SIZE]>, StoreError>;

    fn update_root(&mut self, namespace: &str, hash: [u8; HASH_SIZE]) -> Result<(), StoreError>;
}

/// Universe roots, their leaves and the event log.
pub trait UniverseStore {
    /// Returns the id of the root for `namespace`, creating it if needed.
    fn upsert_universe_root(&mut self, namespace: &str, id: &Identifier)
        -> Result<i64, StoreError>;

    fn fetch_universe_root(&self, namespace: &str) -> Result<Option<UniverseRootRow>, StoreError>;

    fn fetch_universe_roots(
        &self,
        proof_type: Option<ProofType>,
    ) -> Result<Vec<UniverseRootRow>, StoreError>;

    /// Inserts a leaf row and returns its id. A row already holding the same
    /// leaf key is left untouched, original insertion time included.
    fn upsert_universe_leaf(&mut self, leaf: NewUniverseLeaf) -> Result<i64, StoreError>;

    fn fetch_universe_leaf(
        &self,
        namespace: &str,
        universe_key: &[u8; 32],
    ) -> Result<Option<UniverseLeafRow>, StoreError>;

    /// Leaves of a namespace in insertion order, filtered and paginated.
    fn query_universe_leaves(
        &self,
        namespace: &str,
        query: &LeafQuery,
    ) -> Result<Vec<UniverseLeafRow>, StoreError>;

    fn insert_universe_event(
        &mut self,
        universe_root_id: i64,
        event_type: UniverseEventType,
        event_time: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    fn fetch_universe_events(
        &self,
        universe_root_id: i64,
    ) -> Result<Vec<UniverseEventRow>, StoreError>;
}

/// Multiverse roots and the universe each of their leaves stands for.
pub trait MultiverseStore {
    fn upsert_multiverse_root(&mut self, proof_type: ProofType) -> Result<i64, StoreError>;

    fn upsert_multiverse_leaf(
        &mut self,
        multiverse_root_id: i64,
        id: &Identifier,
    ) -> Result<i64, StoreError>;

    fn fetch_multiverse_root(
        &self,
        proof_type: ProofType,
    ) -> Result<Option<MultiverseRootRow>, StoreError>;

    fn fetch_multiverse_leaves(
        &self,
        proof_type: ProofType,
    ) -> Result<Vec<MultiverseLeafRow>, StoreError>;
}

/// Peer servers, sync policies and the proof sync log.
pub trait FederationStore {
    /// Returns the id of the server for `host`, creating it if needed.
    fn upsert_server(&mut self, host: &str) -> Result<i64, StoreError>;

    fn fetch_servers(&self) -> Result<Vec<UniverseServer>, StoreError>;

    fn update_server_sync_time(
        &mut self,
        host: &str,
        time: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Returns whether a server was removed. Its sync log is kept.
    fn delete_server(&mut self, host: &str) -> Result<bool, StoreError>;

    fn upsert_global_sync_config(&mut self, config: GlobalSyncConfig) -> Result<(), StoreError>;

    fn fetch_global_sync_configs(&self) -> Result<Vec<GlobalSyncConfig>, StoreError>;

    fn upsert_namespace_sync_config(
        &mut self,
        config: NamespaceSyncConfig,
    ) -> Result<(), StoreError>;

    fn fetch_namespace_sync_configs(&self) -> Result<Vec<NamespaceSyncConfig>, StoreError>;

    /// Writes the entry, allocating an id for new ones. Returns the id.
    fn upsert_sync_log(&mut self, entry: &SyncLogEntry) -> Result<i64, StoreError>;

    fn fetch_sync_log(&self, key: &SyncLogKey) -> Result<Option<SyncLogEntry>, StoreError>;

    fn query_sync_log(&self, query: &SyncLogQuery) -> Result<Vec<SyncLogEntry>, StoreError>;
}

/// Everything a unit of work can touch.
pub trait UniverseTx: TreeStore<32> + UniverseStore + MultiverseStore + FederationStore {}

impl<T> UniverseTx for T where T: TreeStore<32> + UniverseStore + MultiverseStore + FederationStore {}

/// Options of a unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxOptions {
    read_only: bool,
    namespaces: Vec<String>,
}

impl TxOptions {
    /// A read-only unit of work observing one consistent snapshot.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            namespaces: Vec::new(),
        }
    }

    /// A read-write unit of work holding the write lock of every namespace in
    /// `namespaces` until it commits or rolls back.
    pub fn write<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut namespaces: Vec<String> = namespaces.into_iter().map(Into::into).collect();
        namespaces.sort();
        namespaces.dedup();
        Self {
            read_only: false,
            namespaces,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Namespaces to lock, sorted so every writer takes them in the same
    /// order.
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }
}

/// A store able to run batched, atomic units of work.
pub trait BatchedTx: Send + Sync {
    type Tx: UniverseTx;

    /// Runs `txn` inside one unit of work.
    ///
    /// An error returned by `txn` rolls everything back. When the commit
    /// detects a conflicting write the whole closure is run again, a bounded
    /// number of times, before [`StoreError::ConflictingWrite`] surfaces.
    fn execute<T, E, F>(&self, opts: &TxOptions, txn: F) -> Result<T, E>
    where
        F: FnMut(&mut Self::Tx) -> Result<T, E>,
        E: From<StoreError>;
}
