//! Tests for the Merkle Sum Sparse Merkle Tree implementation

use std::{collections::BTreeMap, sync::Arc, thread};

use hex_literal::hex;
use proptest::prelude::*;
use rand::Rng;
use sha2::Sha256;

use crate::{
    db::{BatchedTx, MemoryDb, TxOptions},
    error::TreeError,
    node::{Branch, ComputedNode, Leaf, Node},
    tree::{EmptyTree, Proof, MSSMT},
};

type Entries = Vec<([u8; 32], Leaf<32, Sha256>)>;

fn insert_all(db: &MemoryDb, tree: &MSSMT<32, Sha256>, entries: &Entries) -> Branch<32, Sha256> {
    db.execute(&TxOptions::write([tree.namespace()]), |tx| {
        let mut root = tree.root(&*tx)?;
        for (key, leaf) in entries {
            root = tree.insert(tx, key, leaf.clone())?;
        }
        Ok::<_, TreeError>(root)
    })
    .unwrap()
}

fn read_root(db: &MemoryDb, tree: &MSSMT<32, Sha256>) -> Branch<32, Sha256> {
    db.execute(&TxOptions::read_only(), |tx| tree.root(tx))
        .unwrap()
}

fn entries_strategy() -> impl Strategy<Value = Entries> {
    prop::collection::btree_map(
        any::<[u8; 32]>(),
        (prop::collection::vec(any::<u8>(), 1..16), any::<u32>()),
        1..8,
    )
    .prop_map(|entries| {
        entries
            .into_iter()
            .map(|(key, (value, sum))| (key, Leaf::new(value, u64::from(sum))))
            .collect()
    })
}

#[test]
fn test_empty_tree() {
    let db = MemoryDb::new();
    let tree = MSSMT::<32, Sha256>::new("empty");
    assert_eq!(
        read_root(&db, &tree).hash(),
        hex!("b1e8e8f2dc3b266452988cfe169aa73be25405eeead02ab5dd6b3c6fd0ca8d67")
    );
    assert_eq!(
        EmptyTree::<32, Sha256>::root_hash(),
        hex!("b1e8e8f2dc3b266452988cfe169aa73be25405eeead02ab5dd6b3c6fd0ca8d67")
    );
}

#[test]
fn test_leaves_insertion() {
    let db = MemoryDb::new();
    let tree = MSSMT::<32, Sha256>::new("insertion");
    let expected = [
        hex!("b46e250d98aa9917abdd1012f72c03ab9a59f6de5253d963a99b7d69c2eca3da"),
        hex!("dc5ab9a0f0b56e215b550b2946cdc72aae2b013aa4790ee4d809a9b43cf2d9aa"),
        hex!("37cb0517efdaaeb2c2c32fac206d8f14070864a1fd69d5368127dba161569ca2"),
    ];
    let mut sum = 0;
    for (i, expected) in (1u8..=3).zip(expected) {
        let root = insert_all(
            &db,
            &tree,
            &vec![([i; 32], Leaf::new([i; 32].to_vec(), u64::from(i)))],
        );
        sum += u64::from(i);
        assert_eq!(root.hash(), expected);
        assert_eq!(root.sum(), sum);
    }
}

#[test]
fn test_history_independant() {
    let db = MemoryDb::new();
    let tree = MSSMT::<32, Sha256>::new("history");
    let root = insert_all(
        &db,
        &tree,
        &vec![
            ([1; 32], Leaf::new([1; 32].to_vec(), 1)),
            ([3; 32], Leaf::new([3; 32].to_vec(), 3)),
            ([2; 32], Leaf::new([2; 32].to_vec(), 2)),
        ],
    );
    assert_eq!(
        root.hash(),
        hex!("37cb0517efdaaeb2c2c32fac206d8f14070864a1fd69d5368127dba161569ca2")
    );
}

#[test]
fn test_delete_then_reinsert_restores_root() {
    let db = MemoryDb::new();
    let tree = MSSMT::<32, Sha256>::new("reinsert");
    let a = ([1; 32], Leaf::new(vec![1], 10));
    let b = ([2; 32], Leaf::new(vec![2], 20));

    let only_a = insert_all(&db, &MSSMT::new("only-a"), &vec![a.clone()]);
    let both = insert_all(&db, &tree, &vec![a, b.clone()]);
    assert_eq!(both.sum(), 30);

    let after_delete = db
        .execute(&TxOptions::write(["reinsert"]), |tx| tree.delete(tx, &b.0))
        .unwrap();
    assert_eq!(after_delete.hash(), only_a.hash());
    assert_eq!(after_delete.sum(), 10);

    let reinserted = insert_all(&db, &tree, &vec![b]);
    assert_eq!(reinserted.hash(), both.hash());
    assert_eq!(reinserted.sum(), 30);
}

#[test]
fn test_proof_tampering_is_rejected() {
    let db = MemoryDb::new();
    let tree = MSSMT::<32, Sha256>::new("tamper");
    let mut rng = rand::thread_rng();
    let entries: Entries = (0..10)
        .map(|i| (rng.gen(), Leaf::new(vec![i; 8], u64::from(i) + 1)))
        .collect();
    let root = insert_all(&db, &tree, &entries);
    let (key, leaf) = entries[3].clone();
    let proof = db
        .execute(&TxOptions::read_only(), |tx| tree.merkle_proof(tx, &key))
        .unwrap();

    proof
        .verify_merkle_proof(&key, leaf.clone(), root.hash(), root.sum())
        .unwrap();

    // value
    let forged = Leaf::new(vec![0xff; 8], leaf.sum());
    assert!(!proof.verify(&key, forged, root.hash(), root.sum()));
    // sum
    let forged = Leaf::new(leaf.value().to_vec(), leaf.sum() + 1);
    assert!(!proof.verify(&key, forged, root.hash(), root.sum()));
    // claimed root sum
    assert!(!proof.verify(&key, leaf.clone(), root.hash(), root.sum() - 1));

    let occupied = proof
        .nodes()
        .iter()
        .position(|node| node.sum() > 0)
        .unwrap();
    let tamper = |node: Node<32, Sha256>| {
        let mut nodes = proof.nodes().to_vec();
        nodes[occupied] = node;
        Proof::<32, Sha256>::new(nodes)
    };
    let sibling = &proof.nodes()[occupied];
    // sibling hash
    let mut hash = sibling.hash();
    hash[0] ^= 1;
    let forged = tamper(Node::Computed(ComputedNode::new(hash, sibling.sum())));
    assert!(!forged.verify(&key, leaf.clone(), root.hash(), root.sum()));
    // sibling sum
    let forged = tamper(Node::Computed(ComputedNode::new(
        sibling.hash(),
        sibling.sum() + 1,
    )));
    assert!(!forged.verify(&key, leaf.clone(), root.hash(), root.sum()));
    // dropping a sibling
    let mut short = proof.nodes().to_vec();
    short.pop();
    assert_eq!(
        Proof::<32, Sha256>::new(short)
            .verify_merkle_proof(&key, leaf, root.hash(), root.sum())
            .unwrap_err(),
        TreeError::InvalidMerkleProof
    );
}

#[test]
fn test_compressed_proof_round_trip_verifies() {
    let db = MemoryDb::new();
    let tree = MSSMT::<32, Sha256>::new("compressed");
    let entries: Entries = (1..=4u8).map(|i| ([i; 32], Leaf::new(vec![i], 5))).collect();
    let root = insert_all(&db, &tree, &entries);
    for (key, leaf) in &entries {
        let proof = db
            .execute(&TxOptions::read_only(), |tx| tree.merkle_proof(tx, key))
            .unwrap();
        let encoded = proof.compress().encode();
        let decoded = crate::tree::CompressedProof::<32, Sha256>::decode(&encoded)
            .unwrap()
            .decompress()
            .unwrap();
        assert!(decoded.verify(key, leaf.clone(), root.hash(), root.sum()));
    }
}

#[test]
fn test_non_inclusion_proof() {
    let db = MemoryDb::new();
    let tree = MSSMT::<32, Sha256>::new("exclusion");
    let root = insert_all(&db, &tree, &vec![([1; 32], Leaf::new(vec![1], 1))]);
    let proof = db
        .execute(&TxOptions::read_only(), |tx| tree.merkle_proof(tx, &[2; 32]))
        .unwrap();
    assert!(proof.verify(&[2; 32], Leaf::empty(), root.hash(), root.sum()));
    assert!(!proof.verify(&[2; 32], Leaf::new(vec![1], 1), root.hash(), root.sum()));
}

#[test]
fn test_concurrent_inserts_in_one_namespace() {
    let db = Arc::new(MemoryDb::new());
    let tree = MSSMT::<32, Sha256>::new("shared");
    let handles: Vec<_> = (0..2u8)
        .map(|worker| {
            let db = db.clone();
            let tree = tree.clone();
            thread::spawn(move || {
                for i in 0..20u8 {
                    let key = [worker * 100 + i; 32];
                    insert_all(&db, &tree, &vec![(key, Leaf::new(vec![worker, i], 1))]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let root = read_root(&db, &tree);
    assert_eq!(root.sum(), 40);
    let leaves = db
        .execute(&TxOptions::read_only(), |tx| tree.scan(tx))
        .unwrap();
    assert_eq!(leaves.len(), 40);

    let replay = MSSMT::<32, Sha256>::new("replay");
    let replayed = insert_all(&db, &replay, &leaves);
    assert_eq!(replayed.hash(), root.hash());
}

#[test]
fn test_compaction_keeps_tree_readable() {
    let db = MemoryDb::new();
    let tree = MSSMT::<32, Sha256>::new("compaction");
    let entries: Entries = (1..=5u8).map(|i| ([i; 32], Leaf::new(vec![i], 1))).collect();
    insert_all(&db, &tree, &entries);
    let root = db
        .execute(&TxOptions::write(["compaction"]), |tx| {
            tree.delete(tx, &[1; 32])?;
            tree.delete(tx, &[2; 32])?;
            tree.delete_unreferenced(tx)?;
            tree.root(&*tx)
        })
        .unwrap();
    assert_eq!(root.sum(), 3);
    let leaves = db
        .execute(&TxOptions::read_only(), |tx| tree.scan(tx))
        .unwrap();
    assert_eq!(
        leaves.into_iter().map(|(key, _)| key).collect::<Vec<_>>(),
        vec![[3; 32], [4; 32], [5; 32]]
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_root_is_order_independent(
        (entries, shuffled) in entries_strategy()
            .prop_flat_map(|entries| (Just(entries.clone()), Just(entries).prop_shuffle()))
    ) {
        let db = MemoryDb::new();
        let first = insert_all(&db, &MSSMT::new("first"), &entries);
        let second = insert_all(&db, &MSSMT::new("second"), &shuffled);
        prop_assert_eq!(first.hash(), second.hash());
        prop_assert_eq!(first.sum(), second.sum());
    }

    #[test]
    fn prop_root_sum_tracks_leaves(
        entries in entries_strategy(),
        deleted in prop::collection::vec(any::<bool>(), 8),
    ) {
        let db = MemoryDb::new();
        let tree = MSSMT::<32, Sha256>::new("sums");
        let root = insert_all(&db, &tree, &entries);
        prop_assert_eq!(root.sum(), entries.iter().map(|(_, leaf)| leaf.sum()).sum::<u64>());

        let mut remaining: BTreeMap<[u8; 32], u64> =
            entries.iter().map(|(key, leaf)| (*key, leaf.sum())).collect();
        let root = db
            .execute(&TxOptions::write(["sums"]), |tx| {
                let mut root = tree.root(&*tx)?;
                for ((key, _), delete) in entries.iter().zip(&deleted) {
                    if *delete {
                        root = tree.delete(tx, key)?;
                        remaining.remove(key);
                    }
                }
                Ok::<_, TreeError>(root)
            })
            .unwrap();
        prop_assert_eq!(root.sum(), remaining.values().sum::<u64>());
    }
}
