use std::sync::Arc;

use chrono::Utc;
use sha2::Sha256;
use tracing::{debug, info};

use super::{
    multiverse::{self, multiverse_namespace},
    Identifier, LeafKey, LeafQuery, NewUniverseLeaf, ProofType, UniverseError, UniverseEventType,
    UniverseLeaf, UniverseLeafRecord, UniverseProof, UniverseRoot, UniverseStats,
};
use crate::{
    db::{BatchedTx, TxOptions, UniverseStore, UniverseTx},
    node::{ComputedNode, Node},
    tree::{EmptyTree, MSSMT},
};

const LOG_TARGET: &str = "universe::archive";

/// Universe and multiverse trees stored in one [`BatchedTx`] backend.
///
/// Every registration updates the universe tree, its leaf and event rows and
/// the multiverse in a single unit of work.
pub struct UniverseArchive<D: BatchedTx> {
    pub(super) db: Arc<D>,
    empty_tree: Arc<Vec<Node<32, Sha256>>>,
}

impl<D: BatchedTx> Clone for UniverseArchive<D> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            empty_tree: self.empty_tree.clone(),
        }
    }
}

impl<D: BatchedTx> UniverseArchive<D> {
    pub fn new(db: Arc<D>) -> Self {
        Self {
            db,
            empty_tree: EmptyTree::<32, Sha256>::empty_tree(),
        }
    }

    pub fn db(&self) -> &Arc<D> {
        &self.db
    }

    pub(super) fn universe_tree(&self, id: &Identifier) -> MSSMT<32, Sha256> {
        MSSMT::with_empty_tree(id.namespace(), self.empty_tree.clone())
    }

    pub(super) fn multiverse_tree(&self, proof_type: ProofType) -> MSSMT<32, Sha256> {
        MSSMT::with_empty_tree(multiverse_namespace(proof_type), self.empty_tree.clone())
    }

    /// Registers a leaf produced by the local asset subsystems.
    pub fn register_leaf(
        &self,
        id: &Identifier,
        leaf_key: &LeafKey,
        leaf: &UniverseLeaf,
    ) -> Result<UniverseProof, UniverseError> {
        self.register_leaf_with(id, leaf_key, leaf, UniverseEventType::NewLeaf)
    }

    /// Inserts (or replaces) the leaf at `leaf_key` in universe `id` and
    /// commits the new universe root to the multiverse, all in one unit of
    /// work. Registering an identical leaf again changes nothing and records
    /// no event.
    pub fn register_leaf_with(
        &self,
        id: &Identifier,
        leaf_key: &LeafKey,
        leaf: &UniverseLeaf,
        event: UniverseEventType,
    ) -> Result<UniverseProof, UniverseError> {
        if leaf.proof.is_empty() {
            return Err(UniverseError::EmptyLeaf);
        }
        let namespace = id.namespace();
        let universe_tree = self.universe_tree(id);
        let multiverse_tree = self.multiverse_tree(id.proof_type);
        let universe_key = leaf_key.universe_key();
        let opts = TxOptions::write([namespace.clone(), multiverse_namespace(id.proof_type)]);

        let (proof, changed) = self.db.execute(&opts, |tx| {
            let universe_root_id = tx.upsert_universe_root(&namespace, id)?;
            let previous = universe_tree.root(tx)?;
            let root = universe_tree.insert(tx, &universe_key, leaf.to_leaf_node())?;
            let universe_root = ComputedNode::new(root.hash(), root.sum());
            let changed = previous.hash() != root.hash();

            tx.upsert_universe_leaf(NewUniverseLeaf {
                universe_root_id,
                namespace: namespace.clone(),
                leaf_key: leaf_key.clone(),
                inserted_at: Utc::now(),
            })?;
            if changed {
                tx.insert_universe_event(universe_root_id, event, Utc::now())?;
                multiverse::update(tx, &multiverse_tree, id, &universe_root)?;
            }

            let proof = proof_bundle(
                &*tx,
                &universe_tree,
                &multiverse_tree,
                id,
                leaf_key,
                leaf.clone(),
            )?;
            Ok::<_, UniverseError>((proof, changed))
        })?;

        if changed {
            debug!(
                target: LOG_TARGET,
                %namespace,
                event = event.as_str(),
                root = %hex::encode(proof.universe_root.hash()),
                sum = proof.universe_root.sum(),
                "universe leaf registered"
            );
        }
        Ok(proof)
    }

    /// Current root of universe `id`.
    pub fn fetch_root(&self, id: &Identifier) -> Result<UniverseRoot, UniverseError> {
        let namespace = id.namespace();
        let tree = self.universe_tree(id);
        self.db.execute(&TxOptions::read_only(), |tx| {
            if tx.fetch_universe_root(&namespace)?.is_none() {
                return Err(UniverseError::NotFound(namespace.clone()));
            }
            let root = tree.root(tx)?;
            Ok(UniverseRoot {
                id: id.clone(),
                root: ComputedNode::new(root.hash(), root.sum()),
            })
        })
    }

    /// Roots of every known universe, optionally of one proof type only.
    pub fn fetch_roots(
        &self,
        proof_type: Option<ProofType>,
    ) -> Result<Vec<UniverseRoot>, UniverseError> {
        self.db.execute(&TxOptions::read_only(), |tx| {
            let mut roots = Vec::new();
            for row in tx.fetch_universe_roots(proof_type)? {
                let root = self.universe_tree(&row.identifier).root(tx)?;
                roots.push(UniverseRoot {
                    id: row.identifier,
                    root: ComputedNode::new(root.hash(), root.sum()),
                });
            }
            Ok(roots)
        })
    }

    /// Leaf keys of universe `id` in insertion order.
    pub fn fetch_leaf_keys(
        &self,
        id: &Identifier,
        query: &LeafQuery,
    ) -> Result<Vec<LeafKey>, UniverseError> {
        let namespace = id.namespace();
        let rows = self.db.execute(&TxOptions::read_only(), |tx| {
            tx.query_universe_leaves(&namespace, query)
        })?;
        Ok(rows.into_iter().map(|row| row.leaf_key).collect())
    }

    /// Leaves of universe `id` in insertion order.
    pub fn fetch_leaves(
        &self,
        id: &Identifier,
        query: &LeafQuery,
    ) -> Result<Vec<UniverseLeafRecord>, UniverseError> {
        let namespace = id.namespace();
        let tree = self.universe_tree(id);
        self.db.execute(&TxOptions::read_only(), |tx| {
            let mut leaves = Vec::new();
            for row in tx.query_universe_leaves(&namespace, query)? {
                let leaf = tree
                    .get(tx, &row.universe_key)?
                    .ok_or_else(|| UniverseError::NotFound(hex::encode(row.universe_key)))?;
                leaves.push(UniverseLeafRecord {
                    leaf_key: row.leaf_key,
                    leaf: leaf.into(),
                    inserted_at: row.inserted_at,
                });
            }
            Ok(leaves)
        })
    }

    /// Proof that the leaf at `leaf_key` is committed in universe `id` and, in
    /// turn, that the universe root is committed in the multiverse.
    pub fn fetch_proof(
        &self,
        id: &Identifier,
        leaf_key: &LeafKey,
    ) -> Result<UniverseProof, UniverseError> {
        let namespace = id.namespace();
        let universe_tree = self.universe_tree(id);
        let multiverse_tree = self.multiverse_tree(id.proof_type);
        let universe_key = leaf_key.universe_key();
        self.db.execute(&TxOptions::read_only(), |tx| {
            if tx.fetch_universe_root(&namespace)?.is_none() {
                return Err(UniverseError::NotFound(namespace.clone()));
            }
            let leaf = universe_tree
                .get(tx, &universe_key)?
                .ok_or_else(|| UniverseError::NotFound(hex::encode(universe_key)))?;
            proof_bundle(tx, &universe_tree, &multiverse_tree, id, leaf_key, leaf.into())
        })
    }

    /// Registration counters of every universe, from its event log.
    pub fn universe_stats(&self) -> Result<Vec<UniverseStats>, UniverseError> {
        self.db.execute(&TxOptions::read_only(), |tx| {
            let mut stats = Vec::new();
            for row in tx.fetch_universe_roots(None)? {
                let events = tx.fetch_universe_events(row.id)?;
                let count = |kind: UniverseEventType| {
                    events.iter().filter(|event| event.event_type == kind).count() as u64
                };
                let total_proofs = count(UniverseEventType::NewLeaf);
                let total_syncs = count(UniverseEventType::Sync);
                stats.push(UniverseStats {
                    id: row.identifier,
                    total_proofs,
                    total_syncs,
                });
            }
            info!(target: LOG_TARGET, universes = stats.len(), "universe stats computed");
            Ok(stats)
        })
    }
}

fn proof_bundle<T: UniverseTx + ?Sized>(
    tx: &T,
    universe_tree: &MSSMT<32, Sha256>,
    multiverse_tree: &MSSMT<32, Sha256>,
    id: &Identifier,
    leaf_key: &LeafKey,
    leaf: UniverseLeaf,
) -> Result<UniverseProof, UniverseError> {
    let universe_root = universe_tree.root(tx)?;
    let multiverse_root = multiverse_tree.root(tx)?;
    Ok(UniverseProof {
        leaf_key: leaf_key.clone(),
        leaf,
        universe_root: ComputedNode::new(universe_root.hash(), universe_root.sum()),
        inclusion_proof: universe_tree.merkle_proof(tx, &leaf_key.universe_key())?,
        multiverse_root: ComputedNode::new(multiverse_root.hash(), multiverse_root.sum()),
        multiverse_inclusion_proof: multiverse_tree.merkle_proof(tx, &id.bytes())?,
    })
}
