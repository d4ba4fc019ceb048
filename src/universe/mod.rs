//! Universes and multiverses.
//!
//! A universe is the MSSMT of every proof of one kind (issuance or transfer)
//! for one asset, or for every asset of one group. Its leaves are keyed by the
//! hash of the minting outpoint and script key of the proof, their value is the
//! raw proof and their sum is the asset amount.
//!
//! The multiverse of a proof type is the MSSMT of every universe root of that
//! type, keyed by universe identifier.

mod archive;
mod multiverse;

pub use archive::UniverseArchive;
pub use multiverse::{multiverse_leaf, multiverse_namespace, MULTIVERSE_NAMESPACE_PREFIX};

use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{
    error::{StoreError, TreeError},
    node::{ComputedNode, Leaf, Sum},
    tree::Proof,
};

pub type AssetId = [u8; 32];

/// What a universe commits to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofType {
    Issuance,
    Transfer,
}

impl ProofType {
    pub const ALL: [ProofType; 2] = [ProofType::Issuance, ProofType::Transfer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issuance => "issuance",
            Self::Transfer => "transfer",
        }
    }
}

impl Display for ProofType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown proof type `{0}`")]
pub struct UnknownProofType(String);

impl FromStr for ProofType {
    type Err = UnknownProofType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issuance" => Ok(Self::Issuance),
            "transfer" => Ok(Self::Transfer),
            other => Err(UnknownProofType(other.to_string())),
        }
    }
}

/// A single asset or a whole asset group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetSpecifier {
    Asset(AssetId),
    /// Serialized group key. Only its bytes matter here.
    Group(Vec<u8>),
}

/// Identifies one universe.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    pub specifier: AssetSpecifier,
    pub proof_type: ProofType,
}

impl Identifier {
    pub fn new(specifier: AssetSpecifier, proof_type: ProofType) -> Self {
        Self {
            specifier,
            proof_type,
        }
    }

    pub fn asset(asset_id: AssetId, proof_type: ProofType) -> Self {
        Self::new(AssetSpecifier::Asset(asset_id), proof_type)
    }

    pub fn group(group_key: impl Into<Vec<u8>>, proof_type: ProofType) -> Self {
        Self::new(AssetSpecifier::Group(group_key.into()), proof_type)
    }

    /// The asset id, or the SHA-256 of the group key. This is also the key of
    /// the universe in its multiverse.
    pub fn bytes(&self) -> [u8; 32] {
        match &self.specifier {
            AssetSpecifier::Asset(asset_id) => *asset_id,
            AssetSpecifier::Group(group_key) => Sha256::digest(group_key).into(),
        }
    }

    /// `<proof_type>-<hex(bytes)>`.
    pub fn namespace(&self) -> String {
        format!("{}-{}", self.proof_type, hex::encode(self.bytes()))
    }

    pub fn asset_id(&self) -> Option<&AssetId> {
        match &self.specifier {
            AssetSpecifier::Asset(asset_id) => Some(asset_id),
            AssetSpecifier::Group(_) => None,
        }
    }

    pub fn group_key(&self) -> Option<&[u8]> {
        match &self.specifier {
            AssetSpecifier::Asset(_) => None,
            AssetSpecifier::Group(group_key) => Some(group_key),
        }
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.namespace())
    }
}

/// Where a proof sits in its universe. The core never derives these, it only
/// stores the bytes handed over by the key and asset subsystems.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafKey {
    /// Serialized minting outpoint.
    pub minting_point: Vec<u8>,
    /// Serialized script key.
    pub script_key: Vec<u8>,
}

impl LeafKey {
    pub fn new(minting_point: impl Into<Vec<u8>>, script_key: impl Into<Vec<u8>>) -> Self {
        Self {
            minting_point: minting_point.into(),
            script_key: script_key.into(),
        }
    }

    /// Key of the leaf in the universe tree: `SHA-256(minting_point || script_key)`.
    pub fn universe_key(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.minting_point);
        hasher.update(&self.script_key);
        hasher.finalize().into()
    }
}

/// Content of a universe leaf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniverseLeaf {
    /// Raw proof blob.
    pub proof: Vec<u8>,
    pub amount: Sum,
}

impl UniverseLeaf {
    pub fn new(proof: impl Into<Vec<u8>>, amount: Sum) -> Self {
        Self {
            proof: proof.into(),
            amount,
        }
    }

    pub fn to_leaf_node(&self) -> Leaf<32, Sha256> {
        Leaf::new(self.proof.clone(), self.amount)
    }
}

impl From<Leaf<32, Sha256>> for UniverseLeaf {
    fn from(leaf: Leaf<32, Sha256>) -> Self {
        let amount = leaf.sum();
        Self::new(leaf.into_value(), amount)
    }
}

/// Current commitment of a universe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniverseRoot {
    pub id: Identifier,
    pub root: ComputedNode<32>,
}

impl UniverseRoot {
    pub fn namespace(&self) -> String {
        self.id.namespace()
    }
}

/// A leaf together with everything needed to check it is committed in its
/// universe and, through the universe root, in the multiverse.
#[derive(Clone, Debug)]
pub struct UniverseProof {
    pub leaf_key: LeafKey,
    pub leaf: UniverseLeaf,
    pub universe_root: ComputedNode<32>,
    pub inclusion_proof: Proof<32, Sha256>,
    pub multiverse_root: ComputedNode<32>,
    pub multiverse_inclusion_proof: Proof<32, Sha256>,
}

impl UniverseProof {
    /// Checks both levels of inclusion for the universe `id`.
    pub fn verify(&self, id: &Identifier) -> bool {
        let leaf_included = self.inclusion_proof.verify(
            &self.leaf_key.universe_key(),
            self.leaf.to_leaf_node(),
            self.universe_root.hash(),
            self.universe_root.sum(),
        );
        let root_included = self.multiverse_inclusion_proof.verify(
            &id.bytes(),
            multiverse::multiverse_leaf(&self.universe_root),
            self.multiverse_root.hash(),
            self.multiverse_root.sum(),
        );
        leaf_included && root_included
    }
}

/// Filter and pagination over the leaves of a universe.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeafQuery {
    pub offset: usize,
    pub limit: Option<usize>,
    pub inserted_after: Option<DateTime<Utc>>,
    pub inserted_before: Option<DateTime<Utc>>,
}

impl LeafQuery {
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn with_time_range(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.inserted_after = after;
        self.inserted_before = before;
        self
    }

    /// Whether a leaf inserted at `time` passes the time filter.
    pub fn matches_time(&self, time: &DateTime<Utc>) -> bool {
        self.inserted_after.map_or(true, |after| *time >= after)
            && self.inserted_before.map_or(true, |before| *time < before)
    }
}

/// A leaf as returned by [`UniverseArchive::fetch_leaves`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniverseLeafRecord {
    pub leaf_key: LeafKey,
    pub leaf: UniverseLeaf,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniverseEventType {
    /// A leaf registered by the local asset subsystems.
    NewLeaf,
    /// A leaf inserted by federation sync.
    Sync,
}

impl UniverseEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewLeaf => "new-leaf",
            Self::Sync => "sync",
        }
    }
}

/// Per universe activity counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniverseStats {
    pub id: Identifier,
    /// Leaves registered by the local asset subsystems.
    pub total_proofs: u64,
    /// Leaves inserted by federation sync.
    pub total_syncs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniverseRootRow {
    pub id: i64,
    pub namespace: String,
    pub identifier: Identifier,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUniverseLeaf {
    pub universe_root_id: i64,
    pub namespace: String,
    pub leaf_key: LeafKey,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniverseLeafRow {
    pub id: i64,
    pub universe_root_id: i64,
    pub namespace: String,
    pub leaf_key: LeafKey,
    pub universe_key: [u8; 32],
    pub inserted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniverseEventRow {
    pub id: i64,
    pub universe_root_id: i64,
    pub event_type: UniverseEventType,
    pub event_time: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiverseRootRow {
    pub id: i64,
    pub namespace: String,
    pub proof_type: ProofType,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiverseLeafRow {
    pub id: i64,
    pub multiverse_root_id: i64,
    pub identifier: Identifier,
    pub leaf_key: [u8; 32],
    pub leaf_namespace: String,
}

/// Errors of the universe layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UniverseError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("proof for leaf {0} does not verify against the claimed root")]
    VerificationFailed(String),
    #[error("conflicting write on namespace `{0}`")]
    ConflictingWrite(String),
    #[error("a universe leaf must carry proof bytes")]
    EmptyLeaf,
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error(transparent)]
    Tree(TreeError),
}

impl From<StoreError> for UniverseError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConflictingWrite(namespace) => Self::ConflictingWrite(namespace),
            other => Self::StorageFailure(other.to_string()),
        }
    }
}

impl From<TreeError> for UniverseError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::Store(err) => err.into(),
            TreeError::InvalidMerkleProof => Self::VerificationFailed("merkle proof".to_string()),
            other => Self::Tree(other),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Identifier, LeafKey, LeafQuery, ProofType};
    use chrono::{Duration, Utc};
    use sha2::{Digest, Sha256};

    #[test]
    fn test_namespace_layout() {
        let id = Identifier::asset([0xab; 32], ProofType::Issuance);
        assert_eq!(id.namespace(), format!("issuance-{}", "ab".repeat(32)));
        let group = Identifier::group(vec![2; 33], ProofType::Transfer);
        let hashed: [u8; 32] = Sha256::digest([2u8; 33]).into();
        assert_eq!(group.bytes(), hashed);
        assert!(group.namespace().starts_with("transfer-"));
        assert_ne!(
            Identifier::asset([1; 32], ProofType::Issuance).namespace(),
            Identifier::asset([1; 32], ProofType::Transfer).namespace()
        );
    }

    #[test]
    fn test_proof_type_parsing() {
        assert_eq!("issuance".parse::<ProofType>(), Ok(ProofType::Issuance));
        assert_eq!("transfer".parse::<ProofType>(), Ok(ProofType::Transfer));
        assert!("minting".parse::<ProofType>().is_err());
        assert_eq!(
            serde_json::to_string(&ProofType::Transfer).unwrap(),
            "\"transfer\""
        );
    }

    #[test]
    fn test_leaf_key_binds_both_parts() {
        let a = LeafKey::new(vec![1; 36], vec![2; 32]);
        let b = LeafKey::new(vec![1; 36], vec![3; 32]);
        assert_ne!(a.universe_key(), b.universe_key());
        assert_eq!(a.universe_key(), a.clone().universe_key());
    }

    #[test]
    fn test_leaf_query_time_range() {
        let now = Utc::now();
        let query = LeafQuery::default().with_time_range(Some(now), Some(now + Duration::hours(1)));
        assert!(query.matches_time(&now));
        assert!(!query.matches_time(&(now - Duration::seconds(1))));
        assert!(!query.matches_time(&(now + Duration::hours(1))));
    }
}
