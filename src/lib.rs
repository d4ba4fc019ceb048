//! Universe commitments over a namespaced Merkle Sum Sparse Merkle Tree
//!
//! The tree follows the taproot-assets MSSMT (https://github.com/lightninglabs/taproot-assets/tree/main/mssmt),
//! a sparse merkle tree where every node also commits to the sum of the
//! values below it. Trees live side by side in one store, each under its own
//! namespace.
//!
//! On top of it:
//! - [`universe`]: one tree per asset and proof type holding every proof,
//!   and one multiverse tree per proof type committing to all universe roots
//! - [`federation`]: sync passes reconciling universes with peer servers,
//!   gated by per universe policies and tracked in a sync log
//! - [`db`]: storage traits and a transactional in-memory backend

pub mod db;
mod error;
pub mod federation;
mod node;
mod tree;
pub mod universe;

pub use error::{StoreError, TreeError};
pub use node::{Branch, ComputedNode, Hasher, Leaf, Node, Sum};
pub use tree::{bit_index, walk_up, CompressedProof, EmptyTree, Proof, MSSMT};

#[cfg(test)]
mod tests;
