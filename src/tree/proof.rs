//! Merkle proofs.
//!
//! A proof is the list of the siblings met on the path from a leaf to the
//! root, leaf level first. Most of them are empty subtrees in a sparse tree,
//! so a proof can be compressed into a bitmap of the empty ones plus the few
//! remaining nodes. The compressed encoding is the one used by taproot-assets
//! so proofs can be exchanged with its universe servers.
use std::{fmt::Debug, sync::Arc};

use bitvec::order::Lsb0;
use bitvec::vec::BitVec;

use super::{walk_up, EmptyTree};
use crate::{
    error::TreeError,
    node::{Branch, ComputedNode, Hasher, Leaf, Node, Sum},
};

/// A merkle proof for a given key.
#[derive(Clone)]
pub struct Proof<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> {
    nodes: Vec<Node<HASH_SIZE, H>>,
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> PartialEq for Proof<HASH_SIZE, H> {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Eq for Proof<HASH_SIZE, H> {}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Debug for Proof<HASH_SIZE, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proof").field("nodes", &self.nodes).finish()
    }
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Proof<HASH_SIZE, H> {
    /// Creates a new proof from a list of nodes.
    pub fn new(nodes: Vec<Node<HASH_SIZE, H>>) -> Self {
        Self { nodes }
    }

    /// Returns the nodes in the proof.
    pub fn nodes(&self) -> &[Node<HASH_SIZE, H>] {
        &self.nodes
    }

    /// Root obtained by walking up from `leaf` at `key`.
    pub fn root(
        &self,
        key: &[u8; HASH_SIZE],
        leaf: Leaf<HASH_SIZE, H>,
    ) -> Result<Branch<HASH_SIZE, H>, TreeError> {
        let siblings = self
            .nodes
            .iter()
            .map(|node| Arc::new(node.clone()))
            .collect::<Vec<_>>();
        walk_up(key, leaf, &siblings, |_, _, _, _| {})
    }

    /// Compresses the proof into a compressed proof.
    pub fn compress(&self) -> CompressedProof<HASH_SIZE, H> {
        let empty_tree = EmptyTree::<HASH_SIZE, H>::empty_tree();
        let mut bits = BitVec::with_capacity(self.nodes.len());
        let mut nodes = Vec::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if node.hash() == empty_tree[HASH_SIZE * 8 - i].hash() {
                bits.push(true);
            } else {
                bits.push(false);
                nodes.push(node.clone());
            }
        }
        CompressedProof::new(nodes, bits)
    }

    /// Verify a merkle proof for a given key.
    ///
    /// The recomputed root must match `root_hash`, and the sum of the leaf and
    /// of every sibling must match `root_sum` without overflowing.
    pub fn verify_merkle_proof(
        &self,
        key: &[u8; HASH_SIZE],
        leaf: Leaf<HASH_SIZE, H>,
        root_hash: [u8; HASH_SIZE],
        root_sum: Sum,
    ) -> Result<(), TreeError> {
        let sum = self
            .nodes
            .iter()
            .try_fold(leaf.sum(), |acc, node| acc.checked_add(node.sum()))
            .ok_or(TreeError::SumOverflow)?;
        let got_root = self.root(key, leaf)?;
        if got_root.hash() == root_hash && sum == root_sum {
            Ok(())
        } else {
            Err(TreeError::InvalidMerkleProof)
        }
    }

    /// Same as [`Proof::verify_merkle_proof`], without the reason of a failure.
    pub fn verify(
        &self,
        key: &[u8; HASH_SIZE],
        leaf: Leaf<HASH_SIZE, H>,
        root_hash: [u8; HASH_SIZE],
        root_sum: Sum,
    ) -> bool {
        self.verify_merkle_proof(key, leaf, root_hash, root_sum)
            .is_ok()
    }
}

/// A compressed merkle proof for a given key.
/// We don't store all the nodes if they are empty.
#[derive(Clone)]
pub struct CompressedProof<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> {
    nodes: Vec<Node<HASH_SIZE, H>>,
    bits: BitVec<u8, Lsb0>,
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> PartialEq for CompressedProof<HASH_SIZE, H> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits && self.nodes == other.nodes
    }
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Eq for CompressedProof<HASH_SIZE, H> {}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Debug for CompressedProof<HASH_SIZE, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedProof")
            .field("nodes", &self.nodes)
            .field("bits", &self.bits)
            .finish()
    }
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> CompressedProof<HASH_SIZE, H> {
    /// Creates a new compressed proof from a list of nodes and a bitvector.
    pub fn new(nodes: Vec<Node<HASH_SIZE, H>>, bits: BitVec<u8, Lsb0>) -> Self {
        Self { nodes, bits }
    }

    pub fn nodes(&self) -> &[Node<HASH_SIZE, H>] {
        &self.nodes
    }

    /// Decompresses the proof into a proof.
    pub fn decompress(&self) -> Result<Proof<HASH_SIZE, H>, TreeError> {
        if self.bits.len() != HASH_SIZE * 8 || self.nodes.len() != self.bits.count_zeros() {
            return Err(TreeError::InvalidMerkleProof);
        }
        let empty_tree = EmptyTree::<HASH_SIZE, H>::empty_tree();
        let mut nodes = Vec::with_capacity(self.bits.len());
        let mut explicit = self.nodes.iter();
        for (i, bit) in self.bits.iter().enumerate() {
            if *bit {
                nodes.push(empty_tree[HASH_SIZE * 8 - i].clone());
            } else {
                let node = explicit.next().ok_or(TreeError::InvalidMerkleProof)?;
                nodes.push(node.clone());
            }
        }
        Ok(Proof::new(nodes))
    }

    /// Encodes the proof into a byte vector:
    /// `count_be16 || (hash || sum_be64)* || bitmap`.
    pub fn encode(&self) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(2 + self.nodes.len() * (HASH_SIZE + 8) + HASH_SIZE);
        encoded.extend_from_slice(&(self.nodes.len() as u16).to_be_bytes());
        for node in self.nodes.iter() {
            encoded.extend_from_slice(&node.hash());
            encoded.extend_from_slice(&node.sum().to_be_bytes());
        }
        encoded.extend_from_slice(self.bits.as_raw_slice());
        encoded
    }

    /// Decodes a proof from a byte vector. The bitmap must cover exactly one
    /// bit per level.
    pub fn decode(data: &[u8]) -> Result<Self, TreeError> {
        let (count, mut rest) = data
            .split_first_chunk::<2>()
            .ok_or(TreeError::InvalidMerkleProof)?;
        let nb_nodes = u16::from_be_bytes(*count);
        let mut nodes = Vec::with_capacity(nb_nodes as usize);
        for _ in 0..nb_nodes {
            let (hash, tail) = rest
                .split_first_chunk::<HASH_SIZE>()
                .ok_or(TreeError::InvalidMerkleProof)?;
            let (sum, tail) = tail
                .split_first_chunk::<8>()
                .ok_or(TreeError::InvalidMerkleProof)?;
            nodes.push(Node::Computed(ComputedNode::new(
                *hash,
                Sum::from_be_bytes(*sum),
            )));
            rest = tail;
        }
        if rest.len() != HASH_SIZE {
            return Err(TreeError::InvalidMerkleProof);
        }
        let bits = BitVec::<u8, Lsb0>::from_slice(rest);
        Ok(Self::new(nodes, bits))
    }
}
