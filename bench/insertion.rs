use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use mssmt_universe::{
    db::{BatchedTx, MemoryDb, TxOptions},
    universe::{Identifier, LeafKey, ProofType, UniverseArchive, UniverseLeaf},
    Leaf, TreeError, MSSMT,
};
use sha2::Sha256;

pub fn generate_random_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    for byte in key.iter_mut() {
        *byte = rand::random();
    }
    key
}

pub fn generate_random_leaf() -> Leaf<32, Sha256> {
    let mut value = Vec::with_capacity(32);
    for _ in 0..32 {
        value.push(rand::random());
    }
    Leaf::new(value, rand::random::<u32>() as u64)
}

fn bench_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("MSSMT Insertion");

    group.bench_function("100 leaves, one unit of work", |b| {
        b.iter_batched(
            MemoryDb::new,
            |db| {
                let tree = MSSMT::<32, Sha256>::new("bench");
                db.execute(&TxOptions::write(["bench"]), |tx| {
                    for _ in 0..100 {
                        tree.insert(tx, &generate_random_key(), generate_random_leaf())?;
                    }
                    Ok::<_, TreeError>(())
                })
                .unwrap();
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("100 leaves, one unit of work each", |b| {
        b.iter_batched(
            MemoryDb::new,
            |db| {
                let tree = MSSMT::<32, Sha256>::new("bench");
                for _ in 0..100 {
                    let key = generate_random_key();
                    let leaf = generate_random_leaf();
                    db.execute(&TxOptions::write(["bench"]), |tx| {
                        tree.insert(tx, &key, leaf.clone())
                    })
                    .unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("Universe Registration");

    group.bench_function("100 leaves", |b| {
        b.iter_batched(
            || UniverseArchive::new(Arc::new(MemoryDb::new())),
            |archive| {
                let id = Identifier::asset(generate_random_key(), ProofType::Issuance);
                for _ in 0..100 {
                    let leaf_key = LeafKey::new(generate_random_key(), generate_random_key());
                    let leaf = generate_random_leaf();
                    archive
                        .register_leaf(&id, &leaf_key, &UniverseLeaf::from(leaf))
                        .unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_insertion, bench_registration);
criterion_main!(benches);
