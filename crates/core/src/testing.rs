//! Test fixtures shared by the unit tests of this crate.

use crate::capability::CryptoProvider;
use crate::clock::LogicalTimestamp;
use crate::entry::{EntryStatus, LedgerEntry};
use crate::error::CryptoError;
use crate::types::Amount;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;

/// BLAKE3 + Ed25519 provider for tests
pub struct TestCrypto;

impl CryptoProvider for TestCrypto {
    fn sign(&self, data: &[u8], secret_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let bytes: [u8; 32] = secret_key
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("expected 32 bytes".to_string()))?;
        Ok(SigningKey::from_bytes(&bytes).sign(data).to_bytes().to_vec())
    }

    fn verify(&self, data: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify(data, &sig).is_ok()
    }

    fn hash(&self, data: &[u8]) -> [u8; 32] {
        *blake3::hash(data).as_bytes()
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(xor(key, plaintext))
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(xor(key, ciphertext))
    }
}

fn xor(key: &[u8], data: &[u8]) -> Vec<u8> {
    data.iter()
        .zip(key.iter().cycle())
        .map(|(d, k)| d ^ k)
        .collect()
}

/// Account with an Ed25519 keypair; the id is the hex verifying key
pub struct TestAccount {
    pub id: String,
    pub secret: [u8; 32],
}

impl TestAccount {
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let id = hex::encode(SigningKey::from_bytes(&secret).verifying_key().to_bytes());
        Self { id, secret }
    }
}

/// Structurally valid, unsigned entry
pub fn sample_entry() -> LedgerEntry {
    LedgerEntry {
        entry_id: "entry-1".to_string(),
        sequence_number: 1,
        transaction_id: "tx-1".to_string(),
        sender_id: "aa".repeat(32),
        receiver_id: "bb".repeat(32),
        amount: Amount::from_coins(5).unwrap_or_default(),
        fee: Amount::from_units(1_000),
        coin_type: "MESH".to_string(),
        input_utxo_hash: None,
        proof_of_work_nonce: 0,
        logical_timestamp: LogicalTimestamp::new(1, "node-a"),
        wall_clock_time: 1_700_000_000_000,
        sender_signature: vec![1; 64],
        receiver_signature: None,
        previous_entry_hash: None,
        entry_hash: String::new(),
        seq_nonce: 1,
        status: EntryStatus::Pending,
    }
}
