use std::time::Duration;

use sha2::Sha256;
use thiserror::Error;

use crate::{
    db::BatchedTx,
    error::TreeError,
    node::ComputedNode,
    tree::CompressedProof,
    universe::{
        Identifier, LeafKey, LeafQuery, ProofType, UniverseArchive, UniverseError,
        UniverseEventType, UniverseLeaf, UniverseProof, UniverseRoot,
    },
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("{0}")]
    Unavailable(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Rejected(String),
}

impl From<UniverseError> for PeerError {
    fn from(err: UniverseError) -> Self {
        match err {
            UniverseError::NotFound(what) => Self::NotFound(what),
            other => Self::Rejected(other.to_string()),
        }
    }
}

/// A leaf as served to peers: the leaf, the root of its universe and the
/// compressed inclusion proof of the leaf under that root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofResponse {
    pub leaf: UniverseLeaf,
    pub universe_root: ComputedNode<32>,
    /// [`CompressedProof::encode`] output.
    pub proof: Vec<u8>,
}

impl ProofResponse {
    /// Checks the proof commits `leaf` at `leaf_key` under `universe_root`,
    /// hash and sum.
    pub fn verify(&self, leaf_key: &LeafKey) -> Result<(), TreeError> {
        let proof = CompressedProof::<32, Sha256>::decode(&self.proof)?.decompress()?;
        proof.verify_merkle_proof(
            &leaf_key.universe_key(),
            self.leaf.to_leaf_node(),
            self.universe_root.hash(),
            self.universe_root.sum(),
        )
    }
}

impl From<&UniverseProof> for ProofResponse {
    fn from(proof: &UniverseProof) -> Self {
        Self {
            leaf: proof.leaf.clone(),
            universe_root: proof.universe_root,
            proof: proof.inclusion_proof.compress().encode(),
        }
    }
}

/// Transport to a peer universe server.
#[async_trait::async_trait]
pub trait UniverseClient: Send + Sync {
    async fn multiverse_root(&self, proof_type: ProofType) -> Result<ComputedNode<32>, PeerError>;

    async fn universe_roots(&self, proof_type: ProofType) -> Result<Vec<UniverseRoot>, PeerError>;

    async fn leaf_keys(&self, id: &Identifier) -> Result<Vec<LeafKey>, PeerError>;

    async fn fetch_proof(
        &self,
        id: &Identifier,
        leaf_key: &LeafKey,
    ) -> Result<ProofResponse, PeerError>;

    /// Hands a local leaf to the peer, which verifies it before inserting it.
    async fn push_proof(
        &self,
        id: &Identifier,
        leaf_key: &LeafKey,
        proof: ProofResponse,
    ) -> Result<(), PeerError>;
}

/// In-process client serving a [`UniverseArchive`].
pub struct ArchiveClient<D: BatchedTx> {
    archive: UniverseArchive<D>,
}

impl<D: BatchedTx> ArchiveClient<D> {
    pub fn new(archive: UniverseArchive<D>) -> Self {
        Self { archive }
    }

    pub fn archive(&self) -> &UniverseArchive<D> {
        &self.archive
    }
}

#[async_trait::async_trait]
impl<D: BatchedTx> UniverseClient for ArchiveClient<D> {
    async fn multiverse_root(&self, proof_type: ProofType) -> Result<ComputedNode<32>, PeerError> {
        Ok(self.archive.multiverse_root(proof_type)?)
    }

    async fn universe_roots(&self, proof_type: ProofType) -> Result<Vec<UniverseRoot>, PeerError> {
        Ok(self.archive.fetch_roots(Some(proof_type))?)
    }

    async fn leaf_keys(&self, id: &Identifier) -> Result<Vec<LeafKey>, PeerError> {
        Ok(self.archive.fetch_leaf_keys(id, &LeafQuery::default())?)
    }

    async fn fetch_proof(
        &self,
        id: &Identifier,
        leaf_key: &LeafKey,
    ) -> Result<ProofResponse, PeerError> {
        let proof = self.archive.fetch_proof(id, leaf_key)?;
        Ok(ProofResponse::from(&proof))
    }

    async fn push_proof(
        &self,
        id: &Identifier,
        leaf_key: &LeafKey,
        proof: ProofResponse,
    ) -> Result<(), PeerError> {
        proof
            .verify(leaf_key)
            .map_err(|err| PeerError::Rejected(err.to_string()))?;
        self.archive
            .register_leaf_with(id, leaf_key, &proof.leaf, UniverseEventType::Sync)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{ArchiveClient, PeerError, UniverseClient};
    use crate::{
        db::MemoryDb,
        universe::{Identifier, LeafKey, ProofType, UniverseArchive, UniverseLeaf},
    };

    fn client() -> ArchiveClient<MemoryDb> {
        ArchiveClient::new(UniverseArchive::new(Arc::new(MemoryDb::new())))
    }

    #[tokio::test]
    async fn test_served_proof_verifies() {
        let client = client();
        let id = Identifier::asset([1; 32], ProofType::Issuance);
        let key = LeafKey::new(vec![1; 36], vec![2; 32]);
        client
            .archive()
            .register_leaf(&id, &key, &UniverseLeaf::new(b"proof".to_vec(), 10))
            .unwrap();

        let response = client.fetch_proof(&id, &key).await.unwrap();
        response.verify(&key).unwrap();
        assert_eq!(response.universe_root.sum(), 10);

        let mut forged = response.clone();
        forged.leaf.amount = 11;
        assert!(forged.verify(&key).is_err());
        let mut truncated = response;
        truncated.proof.pop();
        assert!(truncated.verify(&key).is_err());
    }

    #[tokio::test]
    async fn test_push_rejects_forged_leaf() {
        let source = client();
        let target = client();
        let id = Identifier::asset([1; 32], ProofType::Issuance);
        let key = LeafKey::new(vec![1; 36], vec![2; 32]);
        source
            .archive()
            .register_leaf(&id, &key, &UniverseLeaf::new(b"proof".to_vec(), 10))
            .unwrap();
        let response = source.fetch_proof(&id, &key).await.unwrap();

        let mut forged = response.clone();
        forged.leaf.proof = b"other".to_vec();
        assert!(matches!(
            target.push_proof(&id, &key, forged).await,
            Err(PeerError::Rejected(_))
        ));
        assert!(target.universe_roots(ProofType::Issuance).await.unwrap().is_empty());

        target.push_proof(&id, &key, response).await.unwrap();
        assert_eq!(
            target.multiverse_root(ProofType::Issuance).await.unwrap(),
            source.multiverse_root(ProofType::Issuance).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_missing_leaf_is_not_found() {
        let client = client();
        let id = Identifier::asset([1; 32], ProofType::Issuance);
        let key = LeafKey::new(vec![1; 36], vec![2; 32]);
        assert!(matches!(
            client.fetch_proof(&id, &key).await,
            Err(PeerError::NotFound(_))
        ));
    }
}
