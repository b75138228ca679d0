//! Issuer public keys.
//!
//! A trust list entry carries raw key bytes. `PublicKey` is the usable
//! handle built from them: 32 bytes are an Ed25519 key, 33 or 65 bytes a
//! SEC1-encoded P-256 point.

use anyhow::{anyhow, bail, Result};
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use p256::ecdsa::{Signature as P256Signature, VerifyingKey as P256VerifyingKey};

/// Signature algorithm of a key, with its COSE identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// EdDSA over Ed25519 (COSE -8)
    EdDsa,
    /// ECDSA P-256 with SHA-256 (COSE -7)
    Es256,
}

impl KeyAlgorithm {
    pub fn cose_id(self) -> i128 {
        match self {
            Self::EdDsa => -8,
            Self::Es256 => -7,
        }
    }

    pub fn from_cose_id(id: i128) -> Option<Self> {
        match id {
            -8 => Some(Self::EdDsa),
            -7 => Some(Self::Es256),
            _ => None,
        }
    }
}

/// Usable public key handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Ed25519(VerifyingKey),
    P256(P256VerifyingKey),
}

impl PublicKey {
    /// Build a key from raw trust list bytes.
    pub fn from_raw(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            32 => {
                let key_bytes: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| anyhow!("Invalid Ed25519 public key length"))?;
                VerifyingKey::from_bytes(&key_bytes)
                    .map(Self::Ed25519)
                    .map_err(|e| anyhow!("Invalid Ed25519 public key: {}", e))
            }
            33 | 65 => P256VerifyingKey::from_sec1_bytes(bytes)
                .map(Self::P256)
                .map_err(|e| anyhow!("Invalid P-256 public key: {}", e)),
            len => bail!("Unsupported public key length: {} bytes", len),
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            Self::Ed25519(_) => KeyAlgorithm::EdDsa,
            Self::P256(_) => KeyAlgorithm::Es256,
        }
    }

    /// Raw bytes (uncompressed SEC1 for P-256).
    pub fn to_raw(&self) -> Vec<u8> {
        match self {
            Self::Ed25519(key) => key.to_bytes().to_vec(),
            Self::P256(key) => key.to_encoded_point(false).as_bytes().to_vec(),
        }
    }

    /// Verify a signature over raw bytes.
    ///
    /// P-256 signatures are the fixed-size `r || s` form COSE uses.
    /// Malformed signatures verify as `false`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self {
            Self::Ed25519(key) => {
                let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
                    return false;
                };
                let signature = Ed25519Signature::from_bytes(&sig_bytes);
                key.verify(message, &signature).is_ok()
            }
            Self::P256(key) => {
                use p256::ecdsa::signature::Verifier as _;

                let Ok(signature) = P256Signature::from_slice(signature) else {
                    return false;
                };
                key.verify(message, &signature).is_ok()
            }
        }
    }
}
