//! Capability contracts for the collaborators the core never implements itself.
//!
//! Cryptography and transport are injected into every node as trait objects.
//! Network sends are asynchronous and may fail or time out; signing and
//! hashing are local and synchronous.

use crate::error::{CryptoError, TransportError};
use crate::types::PeerId;
use async_trait::async_trait;

/// Length of every digest produced by [`CryptoProvider::hash`]
pub const DIGEST_LEN: usize = 32;

/// Signing, verification, hashing and symmetric encryption.
pub trait CryptoProvider: Send + Sync {
    /// Sign `data` with a secret key
    fn sign(&self, data: &[u8], secret_key: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verify a signature. Returns false (never panics) on malformed input.
    fn verify(&self, data: &[u8], signature: &[u8], public_key: &[u8]) -> bool;

    /// Digest of `data`
    fn hash(&self, data: &[u8]) -> [u8; DIGEST_LEN];

    /// Authenticated symmetric encryption
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Authenticated symmetric decryption
    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Hex-encoded digest, the form used for ledger hashes
    fn hash_hex(&self, data: &[u8]) -> String {
        hex::encode(self.hash(data))
    }
}

/// Physical link layer (radio, Bluetooth, Wi-Fi Direct, ...).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame to a directly connected peer
    async fn send(&self, peer_id: &str, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Peers with a live link
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Last measured round-trip latency to a peer
    fn link_latency_ms(&self, peer_id: &str) -> Option<u64>;

    /// Lightweight reconnection attempt to a dropped peer
    async fn reconnect(&self, peer_id: &str) -> bool;

    /// Ask the discovery layer for up to `count` new peers
    async fn discover_peers(&self, count: usize) -> Vec<PeerId>;
}

/// Events pushed by the transport into a node's event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A new link came up
    PeerDiscovered { peer_id: PeerId },
    /// A link went down
    PeerDropped { peer_id: PeerId },
    /// A frame arrived from a directly connected peer
    Frame { from: PeerId, bytes: Vec<u8> },
}
