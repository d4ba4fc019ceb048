//! The multiverse: one MSSMT per proof type committing to every universe root
//! of that type.

use sha2::Sha256;

use super::{Identifier, ProofType, UniverseArchive, UniverseError, UniverseRoot};
use crate::{
    db::{BatchedTx, MultiverseStore, TxOptions, UniverseTx},
    error::TreeError,
    node::{Branch, ComputedNode, Leaf},
    tree::{Proof, MSSMT},
};

pub const MULTIVERSE_NAMESPACE_PREFIX: &str = "multiverse";

/// `multiverse-<proof_type>`.
pub fn multiverse_namespace(proof_type: ProofType) -> String {
    format!("{MULTIVERSE_NAMESPACE_PREFIX}-{proof_type}")
}

/// Leaf standing for a universe in its multiverse: the universe root hash as
/// value and the universe root sum as sum.
pub fn multiverse_leaf(universe_root: &ComputedNode<32>) -> Leaf<32, Sha256> {
    Leaf::new(universe_root.hash().to_vec(), universe_root.sum())
}

fn root_from_leaf(leaf: &Leaf<32, Sha256>) -> Result<ComputedNode<32>, TreeError> {
    let hash: [u8; 32] = leaf
        .value()
        .try_into()
        .map_err(|_| TreeError::CorruptNode(hex::encode(leaf.hash())))?;
    Ok(ComputedNode::new(hash, leaf.sum()))
}

/// Commits the new root of universe `id` to its multiverse. Must run in the
/// unit of work that changed the universe.
pub(super) fn update<T: UniverseTx + ?Sized>(
    tx: &mut T,
    tree: &MSSMT<32, Sha256>,
    id: &Identifier,
    universe_root: &ComputedNode<32>,
) -> Result<Branch<32, Sha256>, UniverseError> {
    let multiverse_root_id = tx.upsert_multiverse_root(id.proof_type)?;
    tx.upsert_multiverse_leaf(multiverse_root_id, id)?;
    Ok(tree.insert(tx, &id.bytes(), multiverse_leaf(universe_root))?)
}

impl<D: BatchedTx> UniverseArchive<D> {
    /// Root of the multiverse of `proof_type`. Two servers agreeing on it hold
    /// the same universes.
    pub fn multiverse_root(&self, proof_type: ProofType) -> Result<ComputedNode<32>, UniverseError> {
        let tree = self.multiverse_tree(proof_type);
        let root = self
            .db
            .execute(&TxOptions::read_only(), |tx| tree.root(tx))
            .map_err(UniverseError::from)?;
        Ok(ComputedNode::new(root.hash(), root.sum()))
    }

    /// Every universe committed in the multiverse of `proof_type`, with the
    /// root the multiverse holds for it.
    pub fn multiverse_leaves(
        &self,
        proof_type: ProofType,
    ) -> Result<Vec<UniverseRoot>, UniverseError> {
        let tree = self.multiverse_tree(proof_type);
        self.db.execute(&TxOptions::read_only(), |tx| {
            let mut roots = Vec::new();
            for row in tx.fetch_multiverse_leaves(proof_type)? {
                let leaf = tree
                    .get(tx, &row.leaf_key)?
                    .ok_or_else(|| UniverseError::NotFound(row.leaf_namespace.clone()))?;
                roots.push(UniverseRoot {
                    id: row.identifier,
                    root: root_from_leaf(&leaf)?,
                });
            }
            Ok(roots)
        })
    }

    /// Inclusion proof of universe `id` in its multiverse, with the multiverse
    /// root it was taken against. A universe that doesn't exist gets a
    /// non-inclusion proof.
    pub fn multiverse_proof(
        &self,
        id: &Identifier,
    ) -> Result<(ComputedNode<32>, Proof<32, Sha256>), UniverseError> {
        let tree = self.multiverse_tree(id.proof_type);
        self.db.execute(&TxOptions::read_only(), |tx| {
            let root = tree.root(tx)?;
            let proof = tree.merkle_proof(tx, &id.bytes())?;
            Ok((ComputedNode::new(root.hash(), root.sum()), proof))
        })
    }
}
