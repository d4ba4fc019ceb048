//! Namespaced merkle sum sparse merkle trees.

mod empty;
mod proof;
mod regular;

use std::borrow::Borrow;
use std::sync::Arc;

pub use empty::EmptyTree;
pub use proof::{CompressedProof, Proof};
pub use regular::{bit_index, MSSMT};

use crate::{
    error::TreeError,
    node::{Branch, Hasher, Leaf, Node},
};

/// Walk up the tree from the leaf to the root node.
/// * `key` - key of the leaf we start from.
/// * `start` - starting leaf.
/// * `siblings` - All the sibling nodes on the path, from the leaf level up to the root.
/// * `for_each` - Closure that is executed at each step of the traversal of the tree.
///     * `height: usize` - height of the parent being built
///     * `current: &Node<HASH_SIZE, H>` - current node on the way to the root
///     * `sibling: &Node<HASH_SIZE, H>` - sibling node of the current node
///     * `parent: &Node<HASH_SIZE, H>` - parent node of the current node
pub fn walk_up<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone>(
    key: &[u8; HASH_SIZE],
    start: Leaf<HASH_SIZE, H>,
    siblings: &[Arc<Node<HASH_SIZE, H>>],
    mut for_each: impl FnMut(usize, &Node<HASH_SIZE, H>, &Node<HASH_SIZE, H>, &Node<HASH_SIZE, H>),
) -> Result<Branch<HASH_SIZE, H>, TreeError> {
    let max_levels = MSSMT::<HASH_SIZE, H>::max_levels();
    if siblings.len() != max_levels {
        return Err(TreeError::InvalidMerkleProof);
    }
    let mut current = Arc::new(Node::Leaf(start));
    for i in (0..max_levels).rev() {
        let sibling = siblings[max_levels - 1 - i].clone();
        // order the children based on the path
        let parent = if bit_index(i, key) == 0 {
            Node::Branch(Branch::new_with_arc_children(
                current.clone(),
                sibling.clone(),
            ))
        } else {
            Node::Branch(Branch::new_with_arc_children(
                sibling.clone(),
                current.clone(),
            ))
        };
        for_each(i, &current, &sibling, &parent);
        current = Arc::new(parent);
    }
    if let Node::Branch(current) = current.borrow() {
        Ok(current.clone())
    } else {
        Err(TreeError::ExpectedBranch)
    }
}
