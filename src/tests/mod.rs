//! Scenario tests spanning several modules.

mod tree;
mod universe;

use crate::universe::{LeafKey, UniverseLeaf};

fn leaf_key(i: u8) -> LeafKey {
    LeafKey::new(vec![i; 36], vec![i.wrapping_add(1); 32])
}

fn proof_leaf(i: u8, amount: u64) -> UniverseLeaf {
    UniverseLeaf::new(vec![i; 64], amount)
}

/// Installs a subscriber once so `RUST_LOG` works for test runs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
