use std::{sync::Arc, thread};

use super::{init_tracing, leaf_key, proof_leaf};
use crate::{
    db::MemoryDb,
    tree::EmptyTree,
    universe::{
        multiverse_leaf, Identifier, LeafQuery, ProofType, UniverseArchive, UniverseError,
        UniverseEventType,
    },
};
use sha2::Sha256;

fn archive() -> UniverseArchive<MemoryDb> {
    init_tracing();
    UniverseArchive::new(Arc::new(MemoryDb::new()))
}

#[test]
fn test_multiverse_changes_only_with_universe_roots() {
    let archive = archive();
    let id = Identifier::asset([7; 32], ProofType::Issuance);
    let empty = archive.multiverse_root(ProofType::Issuance).unwrap();
    assert_eq!(empty.hash(), EmptyTree::<32, Sha256>::root_hash());

    archive.register_leaf(&id, &leaf_key(1), &proof_leaf(1, 100)).unwrap();
    let first = archive.multiverse_root(ProofType::Issuance).unwrap();
    assert_ne!(first, empty);
    assert_eq!(first.sum(), 100);

    // Same leaf again: universe root unchanged, so is the multiverse.
    archive.register_leaf(&id, &leaf_key(1), &proof_leaf(1, 100)).unwrap();
    assert_eq!(archive.multiverse_root(ProofType::Issuance).unwrap(), first);

    // Another proof type lives in another multiverse.
    let transfer = Identifier::asset([7; 32], ProofType::Transfer);
    archive
        .register_leaf(&transfer, &leaf_key(1), &proof_leaf(1, 5))
        .unwrap();
    assert_eq!(archive.multiverse_root(ProofType::Issuance).unwrap(), first);
    assert_eq!(archive.multiverse_root(ProofType::Transfer).unwrap().sum(), 5);

    archive.register_leaf(&id, &leaf_key(2), &proof_leaf(2, 50)).unwrap();
    let second = archive.multiverse_root(ProofType::Issuance).unwrap();
    assert_ne!(second, first);
    assert_eq!(second.sum(), 150);
}

#[test]
fn test_multiverse_commits_every_universe_root() {
    let archive = archive();
    let ids = [
        Identifier::asset([1; 32], ProofType::Issuance),
        Identifier::asset([2; 32], ProofType::Issuance),
        Identifier::group(vec![3; 33], ProofType::Issuance),
    ];
    for (i, id) in ids.iter().enumerate() {
        archive
            .register_leaf(id, &leaf_key(i as u8), &proof_leaf(i as u8, 10 * (i as u64 + 1)))
            .unwrap();
    }

    let multiverse_root = archive.multiverse_root(ProofType::Issuance).unwrap();
    assert_eq!(multiverse_root.sum(), 60);
    let leaves = archive.multiverse_leaves(ProofType::Issuance).unwrap();
    assert_eq!(leaves.len(), 3);

    for id in &ids {
        let root = archive.fetch_root(id).unwrap();
        assert!(leaves.contains(&root));
        let (against, proof) = archive.multiverse_proof(id).unwrap();
        assert_eq!(against, multiverse_root);
        assert!(proof.verify(
            &id.bytes(),
            multiverse_leaf(&root.root),
            against.hash(),
            against.sum()
        ));
    }
}

#[test]
fn test_universe_proof_binds_both_levels() {
    let archive = archive();
    let id = Identifier::group(vec![9; 33], ProofType::Transfer);
    archive.register_leaf(&id, &leaf_key(1), &proof_leaf(1, 3)).unwrap();
    archive.register_leaf(&id, &leaf_key(2), &proof_leaf(2, 4)).unwrap();

    let proof = archive.fetch_proof(&id, &leaf_key(1)).unwrap();
    assert!(proof.verify(&id));
    assert_eq!(proof.universe_root.sum(), 7);

    // Proved against the wrong universe.
    let other = Identifier::group(vec![8; 33], ProofType::Transfer);
    assert!(!proof.verify(&other));

    let mut forged = proof.clone();
    forged.leaf.amount = 30;
    assert!(!forged.verify(&id));

    let mut forged = proof;
    forged.leaf_key = leaf_key(2);
    assert!(!forged.verify(&id));
}

#[test]
fn test_sync_events_feed_stats() {
    let archive = archive();
    let id = Identifier::asset([4; 32], ProofType::Issuance);
    archive.register_leaf(&id, &leaf_key(1), &proof_leaf(1, 1)).unwrap();
    archive
        .register_leaf_with(&id, &leaf_key(2), &proof_leaf(2, 1), UniverseEventType::Sync)
        .unwrap();
    archive
        .register_leaf_with(&id, &leaf_key(2), &proof_leaf(2, 1), UniverseEventType::Sync)
        .unwrap();
    archive.register_leaf(&id, &leaf_key(3), &proof_leaf(3, 1)).unwrap();

    // Synced leaves are counted apart from locally registered ones.
    let stats = archive.universe_stats().unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].id, id);
    assert_eq!(stats[0].total_proofs, 2);
    assert_eq!(stats[0].total_syncs, 1);
}

#[test]
fn test_concurrent_registrations_in_one_universe() {
    let archive = archive();
    let id = Identifier::asset([5; 32], ProofType::Issuance);
    let handles: Vec<_> = (0..4u8)
        .map(|worker| {
            let archive = archive.clone();
            let id = id.clone();
            thread::spawn(move || {
                for i in 0..10u8 {
                    let n = worker * 10 + i;
                    archive.register_leaf(&id, &leaf_key(n), &proof_leaf(n, 1)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let root = archive.fetch_root(&id).unwrap();
    assert_eq!(root.root.sum(), 40);
    let leaves = archive.fetch_leaves(&id, &LeafQuery::default()).unwrap();
    assert_eq!(leaves.len(), 40);
    assert_eq!(
        archive.multiverse_leaves(ProofType::Issuance).unwrap(),
        vec![root]
    );
    assert_eq!(archive.multiverse_root(ProofType::Issuance).unwrap().sum(), 40);
}

#[test]
fn test_unknown_universe() {
    let archive = archive();
    let id = Identifier::asset([6; 32], ProofType::Issuance);
    assert!(matches!(archive.fetch_root(&id), Err(UniverseError::NotFound(_))));
    assert!(archive
        .fetch_leaf_keys(&id, &LeafQuery::default())
        .unwrap()
        .is_empty());
    assert!(archive.fetch_roots(None).unwrap().is_empty());
}
