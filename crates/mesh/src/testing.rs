//! Fixtures shared by the unit tests of this crate.

use offmesh_core::clock::{LogicalClock, ManualTimeSource};
use offmesh_core::config::{LedgerConfig, TrustConfig};
use offmesh_core::entry::LedgerEntry;
use offmesh_core::ledger::{LedgerStore, TransferRequest};
use offmesh_core::types::Amount;
use offmesh_crypto::{AccountKeypair, MeshCrypto};
use offmesh_trust_mesh::TrustRegistry;
use std::sync::Arc;

/// Ledger without proof of work, so tests stay fast
pub fn ledger(node_id: &str) -> LedgerStore {
    LedgerStore::new(
        node_id,
        LedgerConfig {
            pow_difficulty_bits: 0,
            ..LedgerConfig::default()
        },
        Arc::new(MeshCrypto::new()),
        Arc::new(LogicalClock::new(node_id)),
    )
}

pub fn trust_registry(node_id: &str) -> TrustRegistry {
    TrustRegistry::new(
        TrustConfig::default(),
        Arc::new(LogicalClock::new(node_id)),
        Arc::new(ManualTimeSource::new(0)),
    )
}

pub fn transfer(sender: &AccountKeypair, receiver: &AccountKeypair, coins: i64) -> TransferRequest {
    TransferRequest {
        sender_id: sender.account_id(),
        receiver_id: receiver.account_id(),
        amount: Amount::from_coins(coins).unwrap(),
        fee: Amount::from_units(100),
        coin_type: "MESH".to_string(),
        input_utxo_hash: None,
        transaction_id: None,
        wall_clock_time: 1_700_000_000_000,
    }
}

/// Create, sign and append one transfer of a single coin
pub fn issue(ledger: &mut LedgerStore, sender: &AccountKeypair, receiver: &AccountKeypair) -> LedgerEntry {
    let entry = ledger
        .create_entry(transfer(sender, receiver, 1), sender.secret_bytes())
        .unwrap();
    ledger.validate_and_append(entry, "self").unwrap()
}
