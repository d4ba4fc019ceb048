//! Tree nodes.
//!
//! Nodes are immutable values identified by their content hash. A branch keeps
//! its two children behind `Arc`s so a freshly built path can share every
//! untouched subtree, while nodes loaded back from a store only carry the
//! `(hash, sum)` pair of their children as [`ComputedNode`]s.

mod branch;
mod computed;
mod leaf;

use sha2::{Digest, Sha256};
use std::fmt::{Debug, Display};

pub use branch::Branch;
pub use computed::ComputedNode;
pub use leaf::Leaf;

impl Hasher<32> for Sha256 {
    fn hash(data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().into()
    }
}

pub type Sum = u64;

/// Simple hash trait required to hash the nodes in the tree
///
/// # Type Parameters
/// * `HASH_SIZE` - The size of the hash digest in bytes
pub trait Hasher<const HASH_SIZE: usize> {
    fn hash(data: &[u8]) -> [u8; HASH_SIZE];
}

/// All possible nodes in the tree.
#[derive(Clone)]
pub enum Node<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> {
    /// A leaf holding a value and a sum. Empty leaves have no value.
    Leaf(Leaf<HASH_SIZE, H>),
    /// A branch with two children.
    Branch(Branch<HASH_SIZE, H>),
    /// A node only known by its hash and sum.
    Computed(ComputedNode<HASH_SIZE>),
}

/// Nodes are compared by what they commit to, so a [`Node::Computed`] equals
/// the branch or leaf it stands for.
impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> PartialEq for Node<HASH_SIZE, H> {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash() && self.sum() == other.sum()
    }
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Eq for Node<HASH_SIZE, H> {}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Debug for Node<HASH_SIZE, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf(leaf) => f
                .debug_struct("Leaf")
                .field("sum", &leaf.sum())
                .field("hash", &hex::encode(leaf.hash()))
                .field("value_len", &leaf.value().len())
                .finish(),
            Self::Branch(branch) => f
                .debug_struct("Branch")
                .field("sum", &branch.sum())
                .field("hash", &hex::encode(branch.hash()))
                .finish(),
            Self::Computed(computed) => f
                .debug_struct("Computed")
                .field("sum", &computed.sum())
                .field("hash", &hex::encode(computed.hash()))
                .finish(),
        }
    }
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Display for Node<HASH_SIZE, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf(leaf) => write!(f, "{}", leaf),
            Self::Branch(branch) => write!(f, "{}", branch),
            Self::Computed(computed) => write!(f, "{}", computed),
        }
    }
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Node<HASH_SIZE, H> {
    /// Creates a [`Node::Branch`] from 2 [`Node`]
    pub fn new_branch(left: Node<HASH_SIZE, H>, right: Node<HASH_SIZE, H>) -> Self {
        Self::Branch(Branch::new(left, right))
    }

    /// Creates a [`Node::Leaf`] from a `value` and a `sum`
    pub fn new_leaf(value: Vec<u8>, sum: Sum) -> Self {
        Self::Leaf(Leaf::new(value, sum))
    }

    pub fn new_empty_leaf() -> Self {
        Self::Leaf(Leaf::empty())
    }

    /// Returns the hash of the node. NO HASHING IS DONE HERE.
    pub fn hash(&self) -> [u8; HASH_SIZE] {
        match self {
            Self::Leaf(leaf) => leaf.hash(),
            Self::Branch(branch) => branch.hash(),
            Self::Computed(computed) => computed.hash(),
        }
    }

    /// Returns the sum of a [`Node`]. NO OPERATION IS DONE HERE.
    pub fn sum(&self) -> Sum {
        match self {
            Self::Leaf(leaf) => leaf.sum(),
            Self::Branch(branch) => branch.sum(),
            Self::Computed(computed) => computed.sum(),
        }
    }

    /// Drops everything but the `(hash, sum)` pair.
    pub fn to_computed(&self) -> ComputedNode<HASH_SIZE> {
        ComputedNode::new(self.hash(), self.sum())
    }
}
