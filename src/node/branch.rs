use std::sync::Arc;
use std::{
    fmt::{Debug, Display},
    marker::PhantomData,
};

use super::Node;
use super::{Hasher, Sum};

/// A branch is a node that has exactly 2 children. It commits to both child
/// hashes and to the sum of all its descendants.
#[derive(Clone)]
pub struct Branch<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> {
    left: Arc<Node<HASH_SIZE, H>>,
    right: Arc<Node<HASH_SIZE, H>>,
    sum: Sum,
    node_hash: [u8; HASH_SIZE],
    _phantom: PhantomData<H>,
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Branch<HASH_SIZE, H> {
    /// Creates a new [`Branch`]. This function performs a hash and an addition.
    ///
    /// Callers must make sure the children sums can't overflow; the tree checks
    /// this before building any path.
    pub fn new(left: Node<HASH_SIZE, H>, right: Node<HASH_SIZE, H>) -> Self {
        Self::new_with_arc_children(Arc::new(left), Arc::new(right))
    }

    pub fn new_with_arc_children(
        left: Arc<Node<HASH_SIZE, H>>,
        right: Arc<Node<HASH_SIZE, H>>,
    ) -> Self {
        let sum = left.sum().wrapping_add(right.sum());
        let node_hash = Self::digest(&left.hash(), &right.hash(), sum);
        Self {
            left,
            right,
            sum,
            node_hash,
            _phantom: PhantomData,
        }
    }

    /// `H(left || right || sum)` with the sum big-endian encoded.
    pub fn digest(
        left: &[u8; HASH_SIZE],
        right: &[u8; HASH_SIZE],
        sum: Sum,
    ) -> [u8; HASH_SIZE] {
        H::hash(
            [
                left.as_slice(),
                right.as_slice(),
                sum.to_be_bytes().as_slice(),
            ]
            .concat()
            .as_slice(),
        )
    }

    /// Returns the hash of the node. NO HASHING IS DONE HERE.
    pub fn hash(&self) -> [u8; HASH_SIZE] {
        self.node_hash
    }

    pub fn sum(&self) -> Sum {
        self.sum
    }

    pub fn left(&self) -> &Node<HASH_SIZE, H> {
        &self.left
    }

    pub fn right(&self) -> &Node<HASH_SIZE, H> {
        &self.right
    }
}

/// Branches are equal when they commit to the same hash and sum.
impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> PartialEq for Branch<HASH_SIZE, H> {
    fn eq(&self, other: &Self) -> bool {
        self.node_hash == other.node_hash && self.sum == other.sum
    }
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Eq for Branch<HASH_SIZE, H> {}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Debug for Branch<HASH_SIZE, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("left", &self.left)
            .field("right", &self.right)
            .field("sum", &self.sum)
            .field("hash", &hex::encode(self.node_hash))
            .finish()
    }
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Display for Branch<HASH_SIZE, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Branch {{ sum: {}, hash: {} }}",
            self.sum(),
            hex::encode(self.hash().as_slice())
        )
    }
}
