//! Account key management

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

/// Key handling errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid secret key: expected 32 bytes, got {0}")]
    InvalidLength(usize),

    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),
}

/// Public half of an account, safe to share
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    /// Key data
    pub data: Vec<u8>,
}

impl PublicKey {
    /// Hex form used as the ledger account id
    pub fn account_id(&self) -> String {
        hex::encode(&self.data)
    }
}

/// Ed25519 account keypair.
///
/// The secret is zeroized when the keypair is dropped.
pub struct AccountKeypair {
    secret: [u8; 32],
    verifying_key: VerifyingKey,
}

impl AccountKeypair {
    /// Generate a fresh keypair from the OS RNG
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let keypair = Self::from_signing_key(SigningKey::from_bytes(&secret));
        secret.zeroize();
        keypair
    }

    /// Restore from raw secret bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&secret)))
    }

    /// Restore from a hex-encoded secret, as stored in node config
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, KeyError> {
        let mut bytes =
            hex::decode(secret_hex.trim()).map_err(|e| KeyError::InvalidHex(e.to_string()))?;
        let result = Self::from_secret_bytes(&bytes);
        bytes.zeroize();
        result
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        Self {
            secret: signing_key.to_bytes(),
            verifying_key: signing_key.verifying_key(),
        }
    }

    /// Hex-encoded verifying key
    pub fn account_id(&self) -> String {
        self.public_key().account_id()
    }

    /// Public half
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            data: self.verifying_key.to_bytes().to_vec(),
        }
    }

    /// Raw secret bytes for [`offmesh_core::CryptoProvider::sign`]
    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret
    }

    /// Sign directly with this keypair
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        SigningKey::from_bytes(&self.secret)
            .sign(data)
            .to_bytes()
            .to_vec()
    }
}

impl Drop for AccountKeypair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for AccountKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKeypair")
            .field("account_id", &self.account_id())
            .finish_non_exhaustive()
    }
}
