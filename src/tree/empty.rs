//! Empty tree implementation for the Merkle Sum Sparse Merkle Tree
use std::{marker::PhantomData, sync::Arc};

use crate::node::{Hasher, Node};

/// Helper struct to create an empty mssmt.
///
/// `empty_tree()[height]` is the root of an empty subtree whose top sits at
/// `height`: index `0` is the empty root, index `HASH_SIZE * 8` the empty leaf.
pub struct EmptyTree<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone>(PhantomData<H>);

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> EmptyTree<HASH_SIZE, H> {
    /// Builds the `HASH_SIZE * 8 + 1` empty subtree roots. This hashes once per
    /// level so callers keep the result around.
    pub fn empty_tree() -> Arc<Vec<Node<HASH_SIZE, H>>> {
        let max_height = HASH_SIZE * 8;
        let mut empty_tree = Vec::with_capacity(max_height + 1);
        empty_tree.push(Node::<HASH_SIZE, H>::new_empty_leaf());

        for i in 1..=max_height {
            // Only the hash and sum of a level are needed to build the next
            // one, which keeps each entry shallow.
            let below = empty_tree[i - 1].to_computed();
            empty_tree.push(Node::new_branch(
                Node::Computed(below),
                Node::Computed(below),
            ));
        }
        empty_tree.reverse();
        Arc::new(empty_tree)
    }

    /// Root hash of an empty tree.
    pub fn root_hash() -> [u8; HASH_SIZE] {
        Self::empty_tree()[0].hash()
    }
}

#[cfg(test)]
mod test {
    use super::EmptyTree;
    use crate::node::Node;
    use hex_literal::hex;
    use sha2::Sha256;

    #[test]
    fn test_empty_tree_shape() {
        let empty_tree = EmptyTree::<32, Sha256>::empty_tree();
        assert_eq!(empty_tree.len(), 257);
        assert!(matches!(empty_tree[256], Node::Leaf(_)));
        assert!(matches!(empty_tree[0], Node::Branch(_)));
        assert_eq!(
            empty_tree[255].hash(),
            hex!("5a61e238f07e3a8114e39670c1e5ff430913d5793028258cf8a49282efee4411")
        );
        assert!(empty_tree.iter().all(|node| node.sum() == 0));
    }
}
