//! Error types shared by the store, the tree and the universe layers.

use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum StoreError {
    /// Another unit of work committed a new root for the namespace after this
    /// one read it. The whole unit of work has to be retried.
    #[error("conflicting write on namespace `{0}`")]
    ConflictingWrite(String),
    /// A mutation was attempted inside a read-only unit of work.
    #[error("write attempted in a read-only transaction")]
    ReadOnly,
    /// Underlying I/O or engine failure.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Error type for tree operations
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum TreeError {
    /// Node was not found in the store
    #[error("node {0} not found in namespace")]
    NodeNotFound(String),
    /// Node is not a branch node
    #[error("node is not a branch node")]
    ExpectedBranch,
    /// Node is not a leaf node
    #[error("node is not a leaf node")]
    ExpectedLeaf,
    /// A stored node doesn't hash to the key it was stored under
    #[error("stored node {0} doesn't match its hash")]
    CorruptNode(String),
    /// Sum overflow
    #[error("sum overflow")]
    SumOverflow,
    /// Invalid merkle proof
    #[error("invalid merkle proof")]
    InvalidMerkleProof,
    #[error(transparent)]
    Store(#[from] StoreError),
}
