//! Cryptographic operations for trust list handling.
//!
//! - Public key handles (Ed25519, P-256) built from raw trust list bytes
//! - The trust anchor that verifies the detached trust list signature
//! - XChaCha20-Poly1305 encryption of the cached trust list at rest
//! - Secure storage of the at-rest key

pub mod anchor;
pub mod encryption;
pub mod keys;
pub mod keystore;

pub use anchor::{TrustAnchor, EMBEDDED_TRUST_ANCHOR};
pub use encryption::{open, seal};
pub use keys::{KeyAlgorithm, PublicKey};
pub use keystore::{FileKeyStore, MemoryKeyStore, SecretKeyStore};
