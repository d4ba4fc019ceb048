use std::{
    fmt::{Debug, Display},
    marker::PhantomData,
};

use super::{Hasher, Sum};

/// A Leaf is a node that has no children and simply holds a `value` (raw bytes)
/// and a `sum`. Leaves are the last row of the tree.
///
/// A leaf without a value is the canonical empty leaf: its sum is always `0`
/// and its hash is `H(0u64)`. Every unoccupied key of the tree maps to it.
#[derive(Clone)]
pub struct Leaf<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> {
    value: Vec<u8>,
    sum: Sum,
    node_hash: [u8; HASH_SIZE],
    _phantom: PhantomData<H>,
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Leaf<HASH_SIZE, H> {
    /// Creates a new [`Leaf`]. This function performs a hash.
    ///
    /// An empty `value` always yields the empty leaf, whatever `sum` is.
    pub fn new(value: Vec<u8>, sum: Sum) -> Self {
        let sum = if value.is_empty() { 0 } else { sum };
        let node_hash = H::hash(
            [value.as_slice(), sum.to_be_bytes().as_slice()]
                .concat()
                .as_slice(),
        );
        Self {
            value,
            sum,
            node_hash,
            _phantom: PhantomData,
        }
    }

    /// The empty leaf.
    pub fn empty() -> Self {
        Self::new(Vec::new(), 0)
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Returns the hash of the node. NO HASHING IS DONE HERE.
    pub fn hash(&self) -> [u8; HASH_SIZE] {
        self.node_hash
    }

    pub fn sum(&self) -> Sum {
        self.sum
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn into_value(self) -> Vec<u8> {
        self.value
    }
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> PartialEq for Leaf<HASH_SIZE, H> {
    fn eq(&self, other: &Self) -> bool {
        self.node_hash == other.node_hash && self.sum == other.sum && self.value == other.value
    }
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Eq for Leaf<HASH_SIZE, H> {}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Debug for Leaf<HASH_SIZE, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leaf")
            .field("value", &hex::encode(&self.value))
            .field("sum", &self.sum)
            .field("hash", &hex::encode(self.node_hash))
            .finish()
    }
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Default for Leaf<HASH_SIZE, H> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> Display for Leaf<HASH_SIZE, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(
                f,
                "Empty {{ sum: 0, hash: {} }}",
                hex::encode(self.hash().as_slice())
            );
        }
        write!(
            f,
            "Leaf {{ sum: {}, hash: {}, value: {:?} }}",
            self.sum(),
            hex::encode(self.hash().as_slice()),
            self.value()
        )
    }
}
