//! Core Merkle Sum Sparse Merkle Tree implementation

use std::{collections::HashSet, sync::Arc};

use tracing::{debug, trace};

use crate::{
    db::{StoredNode, TreeStore},
    error::TreeError,
    node::{Branch, ComputedNode, Hasher, Leaf, Node},
};

use super::{walk_up, EmptyTree, Proof};

const LOG_TARGET: &str = "universe::tree";

/// Merkle sum sparse merkle tree living in one namespace of a [`TreeStore`].
/// * `HASH_SIZE` - size of the hash digest in bytes.
/// * `H` - Hasher that will be used to hash nodes.
///
/// The tree itself is stateless: every operation reads and writes through the
/// transaction it is handed, so two trees over the same namespace see the same
/// data.
#[derive(Clone)]
pub struct MSSMT<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> {
    namespace: String,
    empty_tree: Arc<Vec<Node<HASH_SIZE, H>>>,
}

/// Get the bit at the given index in the key.
pub fn bit_index(index: usize, key: &[u8]) -> u8 {
    // `index / 8` to get the index of the interesting byte
    // `index % 8` to get the interesting bit index in the previously selected byte
    // right shift it and keep only this interesting bit with & 1.
    (key[index / 8] >> (index % 8)) & 1
}

impl<const HASH_SIZE: usize, H: Hasher<HASH_SIZE> + Clone> MSSMT<HASH_SIZE, H> {
    /// Creates a new mssmt. This builds the empty tree, which involves one hash
    /// per level.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self::with_empty_tree(namespace, EmptyTree::<HASH_SIZE, H>::empty_tree())
    }

    /// Creates a new mssmt sharing an already built empty tree.
    pub fn with_empty_tree(
        namespace: impl Into<String>,
        empty_tree: Arc<Vec<Node<HASH_SIZE, H>>>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            empty_tree,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Max height of the tree
    pub const fn max_levels() -> usize {
        HASH_SIZE * 8
    }

    fn empty_root(&self) -> Result<Branch<HASH_SIZE, H>, TreeError> {
        match &self.empty_tree[0] {
            Node::Branch(branch) => Ok(branch.clone()),
            _ => Err(TreeError::ExpectedBranch),
        }
    }

    /// Root node of the tree. A namespace nothing was ever inserted in has the
    /// empty root.
    pub fn root<S: TreeStore<HASH_SIZE> + ?Sized>(
        &self,
        tx: &S,
    ) -> Result<Branch<HASH_SIZE, H>, TreeError> {
        match tx.root_hash(&self.namespace)? {
            Some(hash) if hash != self.empty_tree[0].hash() => {
                let (left, right) = self.get_children(tx, 0, hash)?;
                Ok(Branch::new(left, right))
            }
            _ => self.empty_root(),
        }
    }

    /// Loads the children of the branch `hash` sitting at `height`.
    ///
    /// Branch children come back as [`Node::Computed`], leaves in full. The
    /// branch is rehashed from its children so a tampered row is caught here.
    fn get_children<S: TreeStore<HASH_SIZE> + ?Sized>(
        &self,
        tx: &S,
        height: usize,
        hash: [u8; HASH_SIZE],
    ) -> Result<(Node<HASH_SIZE, H>, Node<HASH_SIZE, H>), TreeError> {
        if hash == self.empty_tree[height].hash() {
            let child = self.empty_tree[height + 1].clone();
            return Ok((child.clone(), child));
        }
        let (left, right, sum) = match tx.fetch_node(&self.namespace, &hash)? {
            Some(StoredNode::Branch { left, right, sum }) => (left, right, sum),
            Some(StoredNode::Leaf { .. }) => return Err(TreeError::ExpectedBranch),
            None => return Err(TreeError::NodeNotFound(hex::encode(hash))),
        };
        let left = self.load_child(tx, height + 1, left)?;
        let right = self.load_child(tx, height + 1, right)?;
        let children_sum = left.sum().checked_add(right.sum());
        if children_sum != Some(sum)
            || Branch::<HASH_SIZE, H>::digest(&left.hash(), &right.hash(), sum) != hash
        {
            return Err(TreeError::CorruptNode(hex::encode(hash)));
        }
        Ok((left, right))
    }

    fn load_child<S: TreeStore<HASH_SIZE> + ?Sized>(
        &self,
        tx: &S,
        height: usize,
        hash: [u8; HASH_SIZE],
    ) -> Result<Node<HASH_SIZE, H>, TreeError> {
        if hash == self.empty_tree[height].hash() {
            return Ok(self.empty_tree[height].clone());
        }
        let at_leaf_level = height == Self::max_levels();
        match tx.fetch_node(&self.namespace, &hash)? {
            Some(StoredNode::Leaf { value, sum, .. }) if at_leaf_level => {
                let leaf = Leaf::new(value, sum);
                if leaf.hash() != hash {
                    return Err(TreeError::CorruptNode(hex::encode(hash)));
                }
                Ok(Node::Leaf(leaf))
            }
            Some(StoredNode::Branch { sum, .. }) if !at_leaf_level => {
                Ok(Node::Computed(ComputedNode::new(hash, sum)))
            }
            Some(StoredNode::Leaf { .. }) => Err(TreeError::ExpectedBranch),
            Some(StoredNode::Branch { .. }) => Err(TreeError::ExpectedLeaf),
            None => Err(TreeError::NodeNotFound(hex::encode(hash))),
        }
    }

    /// Walk down the tree from the root node to the leaf at `key`.
    /// * `for_each` - Closure that is executed at each step of the traversal of the tree.
    pub fn walk_down<S: TreeStore<HASH_SIZE> + ?Sized>(
        &self,
        tx: &S,
        key: &[u8; HASH_SIZE],
        mut for_each: impl FnMut(usize, &Node<HASH_SIZE, H>, Node<HASH_SIZE, H>, Node<HASH_SIZE, H>),
    ) -> Result<Leaf<HASH_SIZE, H>, TreeError> {
        let mut current = Node::Branch(self.root(tx)?);
        for i in 0..Self::max_levels() {
            let (left, right) = self.get_children(tx, i, current.hash())?;
            let (next, sibling) = if bit_index(i, key) == 0 {
                (left, right)
            } else {
                (right, left)
            };
            for_each(i, &next, sibling, current);
            current = next;
        }
        let Node::Leaf(leaf) = current else {
            return Err(TreeError::ExpectedLeaf);
        };
        Ok(leaf)
    }

    /// Insert a leaf in the tree, replacing whatever sits at `key`. Returns
    /// the new root.
    ///
    /// Nothing is written when the new total sum would overflow.
    pub fn insert<S: TreeStore<HASH_SIZE> + ?Sized>(
        &self,
        tx: &mut S,
        key: &[u8; HASH_SIZE],
        leaf: Leaf<HASH_SIZE, H>,
    ) -> Result<Branch<HASH_SIZE, H>, TreeError> {
        let mut siblings = Vec::with_capacity(Self::max_levels());
        let mut root_sum = 0;
        let old_leaf = self.walk_down(&*tx, key, |height, _next, sibling, parent| {
            if height == 0 {
                root_sum = parent.sum();
            }
            siblings.push(Arc::new(sibling));
        })?;
        siblings.reverse();

        root_sum
            .checked_sub(old_leaf.sum())
            .and_then(|rest| rest.checked_add(leaf.sum()))
            .ok_or(TreeError::SumOverflow)?;

        let mut branches = Vec::new();
        let root = walk_up(key, leaf.clone(), &siblings, |height, _, _, parent| {
            if parent.hash() != self.empty_tree[height].hash() {
                if let Node::Branch(parent) = parent {
                    branches.push(parent.clone());
                }
            }
        })?;

        for branch in branches {
            tx.insert_node(
                &self.namespace,
                branch.hash(),
                StoredNode::Branch {
                    left: branch.left().hash(),
                    right: branch.right().hash(),
                    sum: branch.sum(),
                },
            )?;
        }
        if !leaf.is_empty() {
            tx.insert_node(
                &self.namespace,
                leaf.hash(),
                StoredNode::Leaf {
                    key: *key,
                    value: leaf.value().to_vec(),
                    sum: leaf.sum(),
                },
            )?;
        }
        tx.update_root(&self.namespace, root.hash())?;
        trace!(
            target: LOG_TARGET,
            namespace = %self.namespace,
            root = %hex::encode(root.hash()),
            sum = root.sum(),
            "tree root updated"
        );
        Ok(root)
    }

    pub fn merkle_proof<S: TreeStore<HASH_SIZE> + ?Sized>(
        &self,
        tx: &S,
        key: &[u8; HASH_SIZE],
    ) -> Result<Proof<HASH_SIZE, H>, TreeError> {
        let mut proof = Vec::with_capacity(Self::max_levels());
        self.walk_down(tx, key, |_, _next, sibling, _| {
            proof.push(sibling);
        })?;
        proof.reverse();
        Ok(Proof::new(proof))
    }

    /// Replaces the leaf at `key` with the empty leaf. Returns the new root.
    pub fn delete<S: TreeStore<HASH_SIZE> + ?Sized>(
        &self,
        tx: &mut S,
        key: &[u8; HASH_SIZE],
    ) -> Result<Branch<HASH_SIZE, H>, TreeError> {
        self.insert(tx, key, Leaf::empty())
    }

    /// The leaf at `key`, `None` if the key is unoccupied.
    pub fn get<S: TreeStore<HASH_SIZE> + ?Sized>(
        &self,
        tx: &S,
        key: &[u8; HASH_SIZE],
    ) -> Result<Option<Leaf<HASH_SIZE, H>>, TreeError> {
        let leaf = self.walk_down(tx, key, |_, _, _, _| {})?;
        Ok((!leaf.is_empty()).then_some(leaf))
    }

    /// Visits every non-empty subtree reachable from the root, depth first.
    /// `on_branch` gets each branch hash, `on_leaf` each occupied leaf with the
    /// key rebuilt from its path.
    fn traverse<S: TreeStore<HASH_SIZE> + ?Sized>(
        &self,
        tx: &S,
        mut on_branch: impl FnMut([u8; HASH_SIZE]),
        mut on_leaf: impl FnMut([u8; HASH_SIZE], Leaf<HASH_SIZE, H>),
    ) -> Result<(), TreeError> {
        let root = self.root(tx)?;
        let mut stack = vec![(root.hash(), 0usize, [0u8; HASH_SIZE])];
        while let Some((hash, height, key)) = stack.pop() {
            if hash == self.empty_tree[height].hash() {
                continue;
            }
            on_branch(hash);
            let (left, right) = self.get_children(tx, height, hash)?;
            let mut right_key = key;
            right_key[height / 8] |= 1 << (height % 8);
            for (child, child_key) in [(right, right_key), (left, key)] {
                if height + 1 < Self::max_levels() {
                    stack.push((child.hash(), height + 1, child_key));
                    continue;
                }
                match child {
                    Node::Leaf(leaf) if leaf.is_empty() => {}
                    Node::Leaf(leaf) => on_leaf(child_key, leaf),
                    _ => return Err(TreeError::ExpectedLeaf),
                }
            }
        }
        Ok(())
    }

    /// Every occupied leaf with its key, sorted by key. Each visited node is
    /// checked against its hash on the way.
    pub fn scan<S: TreeStore<HASH_SIZE> + ?Sized>(
        &self,
        tx: &S,
    ) -> Result<Vec<([u8; HASH_SIZE], Leaf<HASH_SIZE, H>)>, TreeError> {
        let mut leaves = Vec::new();
        self.traverse(tx, |_| {}, |key, leaf| leaves.push((key, leaf)))?;
        leaves.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(leaves)
    }

    /// Deletes the nodes of the namespace that the current root no longer
    /// reaches. Returns how many were removed.
    pub fn delete_unreferenced<S: TreeStore<HASH_SIZE> + ?Sized>(
        &self,
        tx: &mut S,
    ) -> Result<usize, TreeError> {
        let mut reachable = HashSet::new();
        let mut leaves = Vec::new();
        self.traverse(
            &*tx,
            |hash| {
                reachable.insert(hash);
            },
            |_, leaf| leaves.push(leaf.hash()),
        )?;
        reachable.extend(leaves);
        let mut removed = 0;
        for hash in tx.node_hashes(&self.namespace)? {
            if !reachable.contains(&hash) {
                tx.delete_node(&self.namespace, &hash)?;
                removed += 1;
            }
        }
        debug!(
            target: LOG_TARGET,
            namespace = %self.namespace,
            removed,
            kept = reachable.len(),
            "unreferenced nodes deleted"
        );
        Ok(removed)
    }
}
