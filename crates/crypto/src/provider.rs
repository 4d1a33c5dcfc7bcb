//! Ed25519 / BLAKE3 / ChaCha20-Poly1305 implementation of the crypto capability.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use offmesh_core::{CryptoError, CryptoProvider, DIGEST_LEN};
use rand::{rngs::OsRng, RngCore};
use tracing::debug;
use zeroize::Zeroize;

/// Nonce size for ChaCha20-Poly1305 (96 bits / 12 bytes).
pub const NONCE_SIZE: usize = 12;

const KEY_SIZE: usize = 32;

/// Production crypto provider.
///
/// Ciphertexts are laid out as `nonce || sealed`, so `decrypt` needs only
/// the key and the ciphertext.
#[derive(Debug, Default, Clone, Copy)]
pub struct MeshCrypto;

impl MeshCrypto {
    /// Create a provider
    pub fn new() -> Self {
        Self
    }

    fn cipher(key: &[u8]) -> Result<ChaCha20Poly1305, CryptoError> {
        if key.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                key.len()
            )));
        }
        Ok(ChaCha20Poly1305::new(Key::from_slice(key)))
    }
}

impl CryptoProvider for MeshCrypto {
    fn sign(&self, data: &[u8], secret_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut bytes: [u8; 32] = secret_key.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("expected 32 bytes, got {}", secret_key.len()))
        })?;
        let signing_key = SigningKey::from_bytes(&bytes);
        bytes.zeroize();
        Ok(signing_key.sign(data).to_bytes().to_vec())
    }

    fn verify(&self, data: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
            debug!(len = public_key.len(), "Rejecting malformed public key");
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(data, &signature).is_ok()
    }

    fn hash(&self, data: &[u8]) -> [u8; DIGEST_LEN] {
        *blake3::hash(data).as_bytes()
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Self::cipher(key)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(CryptoError::Decryption("ciphertext shorter than nonce".to_string()));
        }
        let cipher = Self::cipher(key)?;
        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|e| CryptoError::Decryption(e.to_string()))
    }
}
