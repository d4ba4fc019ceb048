//! Two in-process universe servers reconciling their issuance universes.
//!
//! Run with `RUST_LOG=universe=debug` to follow the pass.

use std::sync::Arc;

use mssmt_universe::{
    db::MemoryDb,
    federation::{
        ArchiveClient, FederationSyncer, GlobalSyncConfig, Peer, Shutdown, SyncLogQuery,
        SyncerConfig,
    },
    universe::{Identifier, LeafKey, ProofType, UniverseArchive, UniverseLeaf},
};
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"{
    "fetch_timeout_ms": 5000,
    "max_attempts": 3,
    "backoff": { "initial_ms": 500, "max_ms": 10000, "multiplier": 2 },
    "proof_types": ["issuance"]
}"#;

fn syncer(config: &SyncerConfig) -> Result<FederationSyncer<MemoryDb>, Box<dyn std::error::Error>> {
    let syncer = FederationSyncer::new(
        UniverseArchive::new(Arc::new(MemoryDb::new())),
        config.clone(),
    );
    syncer.set_global_config(GlobalSyncConfig {
        proof_type: ProofType::Issuance,
        allow_sync_insert: true,
        allow_sync_export: true,
    })?;
    Ok(syncer)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = SyncerConfig::from_json(CONFIG)?;
    let local = syncer(&config)?;
    let remote = syncer(&config)?;

    let id = Identifier::asset([7; 32], ProofType::Issuance);
    for i in 0..3u8 {
        let leaf_key = LeafKey::new(vec![i; 36], vec![i; 33]);
        let leaf = UniverseLeaf::new(vec![i; 128], 10 * (u64::from(i) + 1));
        if i % 2 == 0 {
            local.archive().register_leaf(&id, &leaf_key, &leaf)?;
        } else {
            remote.archive().register_leaf(&id, &leaf_key, &leaf)?;
        }
    }

    local.add_server("remote.example:10029")?;
    let peer = Peer::new(
        "remote.example:10029",
        Arc::new(ArchiveClient::new(remote.archive().clone())),
    );
    let shutdown = Shutdown::new();
    let results = local.sync_all(vec![peer], shutdown.to_signal()).await;
    for (host, result) in results {
        for report in result? {
            println!(
                "{host} {}: pulled {}, pushed {}, denied {}, failed {}",
                report.proof_type,
                report.pulled,
                report.pushed,
                report.denied,
                report.failures.len()
            );
        }
    }

    for entry in local.sync_log(&SyncLogQuery::default())? {
        println!(
            "{} {} {} attempts={}",
            entry.namespace(),
            entry.direction(),
            entry.status(),
            entry.attempt_counter()
        );
    }
    let converged = local.archive().multiverse_root(ProofType::Issuance)?
        == remote.archive().multiverse_root(ProofType::Issuance)?;
    println!("Multiverse roots match: {converged}");
    Ok(())
}
