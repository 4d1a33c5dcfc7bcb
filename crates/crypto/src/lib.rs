//! Cryptographic capability for OffMesh nodes.
//!
//! Implements [`offmesh_core::CryptoProvider`] with vetted primitives:
//!
//! - **Signatures**: Ed25519
//! - **Hashing**: BLAKE3
//! - **Encryption**: ChaCha20-Poly1305 with a random 96-bit nonce per message
//!
//! Account identifiers are hex-encoded Ed25519 verifying keys, so any node
//! can verify a ledger signature from the sender id alone.
//!
//! # Security Principles
//!
//! - Secrets must never be logged or hardcoded
//! - Secret key material is zeroized on drop
//! - Verification never panics on malformed input

pub mod keys;
pub mod provider;

pub use keys::{AccountKeypair, KeyError};
pub use provider::{MeshCrypto, NONCE_SIZE};
