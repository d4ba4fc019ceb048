//! Basic example of using the Merkle Sum Sparse Merkle Tree
//!
//! This example demonstrates:
//! - Inserting leaves in a namespaced tree
//! - Getting the root hash and sum
//! - Verifying merkle proofs, plain and compressed
//! - Registering proofs in a universe and checking them against the multiverse

use std::sync::Arc;

use mssmt_universe::{
    db::{BatchedTx, MemoryDb, TxOptions},
    universe::{Identifier, LeafKey, ProofType, UniverseArchive, UniverseLeaf},
    CompressedProof, Leaf, Proof, TreeError, MSSMT,
};
use sha2::Sha256;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let db = Arc::new(MemoryDb::new());

    // A bare tree in its own namespace.
    let tree = MSSMT::<32, Sha256>::new("example");
    let leaf1 = Leaf::new(vec![1, 2, 3], 100);
    let (root, proof) = db.execute(&TxOptions::write(["example"]), |tx| {
        tree.insert(tx, &[1; 32], leaf1.clone())?;
        tree.insert(tx, &[2; 32], Leaf::new(vec![4, 5, 6], 200))?;
        let root = tree.insert(tx, &[3; 32], Leaf::new(vec![7, 8, 9], 300))?;
        Ok::<_, TreeError>((root, tree.merkle_proof(&*tx, &[1; 32])?))
    })?;
    println!("Root hash: {}", hex::encode(root.hash()));
    println!("Total sum: {}", root.sum());

    // Proofs usually travel compressed.
    let encoded = proof.compress().encode();
    println!("Compressed proof: {} bytes", encoded.len());
    let decoded: Proof<32, Sha256> = CompressedProof::decode(&encoded)?.decompress()?;
    decoded.verify_merkle_proof(&[1; 32], leaf1, root.hash(), root.sum())?;
    println!("Proof verification: ok");

    // Universes and their multiverse share the same store.
    let archive = UniverseArchive::new(db);
    let id = Identifier::asset([0xaa; 32], ProofType::Issuance);
    let leaf_key = LeafKey::new(vec![0x01; 36], vec![0x02; 33]);
    let universe_proof =
        archive.register_leaf(&id, &leaf_key, &UniverseLeaf::new(b"raw proof".to_vec(), 1_000))?;
    println!("Universe {}: root sum {}", id, universe_proof.universe_root.sum());
    println!(
        "Multiverse root: {}",
        hex::encode(archive.multiverse_root(ProofType::Issuance)?.hash())
    );
    println!("Universe proof verification: {}", universe_proof.verify(&id));
    Ok(())
}
