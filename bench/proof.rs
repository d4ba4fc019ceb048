use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mssmt_universe::{
    db::{BatchedTx, MemoryDb, TxOptions},
    CompressedProof, Leaf, Proof, TreeError, MSSMT,
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

#[allow(clippy::type_complexity)]
fn setup_tree(
    num_leaves: usize,
) -> (
    MemoryDb,
    MSSMT<32, Sha256>,
    Vec<([u8; 32], Leaf<32, Sha256>)>,
) {
    let db = MemoryDb::new();
    let tree = MSSMT::<32, Sha256>::new("bench");
    let leaves: Vec<_> = (0..num_leaves)
        .map(|_| (generate_random_key(), generate_random_leaf()))
        .collect();
    db.execute(&TxOptions::write(["bench"]), |tx| {
        for (key, leaf) in &leaves {
            tree.insert(tx, key, leaf.clone())?;
        }
        Ok::<_, TreeError>(())
    })
    .unwrap();
    (db, tree, leaves)
}

fn bench_proof_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("MSSMT Proof Generation");
    let (db, tree, leaves) = setup_tree(100);

    group.bench_function("Regular Tree", |b| {
        b.iter(|| {
            db.execute(&TxOptions::read_only(), |tx| {
                for (key, _) in &leaves {
                    black_box(tree.merkle_proof(tx, key)?);
                }
                Ok::<_, TreeError>(())
            })
            .unwrap();
        })
    });

    group.finish();
}

fn bench_proof_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("MSSMT Proof Verification");
    let (db, tree, leaves) = setup_tree(100);
    let (root, proofs) = db
        .execute(&TxOptions::read_only(), |tx| {
            let tx = &*tx;
            let proofs = leaves
                .iter()
                .map(|(key, _)| tree.merkle_proof(tx, key))
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, TreeError>((tree.root(tx)?, proofs))
        })
        .unwrap();
    let encoded: Vec<Vec<u8>> = proofs
        .iter()
        .map(|proof| proof.compress().encode())
        .collect();

    group.bench_function("Regular Tree", |b| {
        b.iter(|| {
            for ((key, leaf), proof) in leaves.iter().zip(&proofs) {
                black_box(proof.verify_merkle_proof(key, leaf.clone(), root.hash(), root.sum()))
                    .unwrap();
            }
        })
    });

    group.bench_function("Compressed Proof", |b| {
        b.iter(|| {
            for ((key, leaf), bytes) in leaves.iter().zip(&encoded) {
                let proof: Proof<32, Sha256> = CompressedProof::decode(bytes)
                    .and_then(|compressed| compressed.decompress())
                    .unwrap();
                black_box(proof.verify_merkle_proof(key, leaf.clone(), root.hash(), root.sum()))
                    .unwrap();
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_proof_generation, bench_proof_verification);
criterion_main!(benches);
