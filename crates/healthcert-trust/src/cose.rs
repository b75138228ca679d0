//! COSE_Sign1 signed envelopes.
//!
//! The signature resource is a COSE_Sign1 structure (optionally tagged 18):
//! `[protected: bstr, unprotected: map, payload: bstr, signature: bstr]`.
//! The signature covers `["Signature1", protected, h'', payload]`.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use ed25519_dalek::{Signer, SigningKey};
use serde_cbor::Value;
use tracing::warn;

use crate::crypto::keys::{KeyAlgorithm, PublicKey};
use crate::error::TrustError;

/// CBOR tag of COSE_Sign1
pub const COSE_SIGN1_TAG: u64 = 18;

const HEADER_ALG: i128 = 1;
const SIGNATURE1_CONTEXT: &str = "Signature1";

/// A decoded, not yet verified COSE_Sign1 envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedEnvelope {
    /// Serialized protected header, exactly as received
    pub protected: Vec<u8>,
    /// `alg` header, protected bucket first
    pub algorithm: Option<i128>,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

fn header_alg(header: &BTreeMap<Value, Value>) -> Option<i128> {
    match header.get(&Value::Integer(HEADER_ALG)) {
        Some(Value::Integer(alg)) => Some(*alg),
        _ => None,
    }
}

impl SignedEnvelope {
    /// Decode envelope bytes. Structural problems are service errors.
    pub fn decode(bytes: &[u8]) -> Result<Self, TrustError> {
        let value: Value = serde_cbor::from_slice(bytes)
            .map_err(|e| TrustError::service(format!("signed envelope is not CBOR: {e}")))?;

        let value = match value {
            Value::Tag(COSE_SIGN1_TAG, inner) => *inner,
            other => other,
        };

        let Value::Array(items) = value else {
            return Err(TrustError::service("signed envelope is not a COSE_Sign1 array"));
        };

        let [protected, unprotected, payload, signature]: [Value; 4] = items
            .try_into()
            .map_err(|_| TrustError::service("COSE_Sign1 must have four elements"))?;

        let Value::Bytes(protected) = protected else {
            return Err(TrustError::service("COSE_Sign1 protected header is not a byte string"));
        };
        let Value::Map(unprotected) = unprotected else {
            return Err(TrustError::service("COSE_Sign1 unprotected header is not a map"));
        };
        let Value::Bytes(payload) = payload else {
            return Err(TrustError::service("COSE_Sign1 payload is missing or detached"));
        };
        // A non-bstr signature is a malformed signature, not a malformed envelope.
        let signature = match signature {
            Value::Bytes(signature) => signature,
            _ => Vec::new(),
        };

        let protected_alg = if protected.is_empty() {
            None
        } else {
            let header: BTreeMap<Value, Value> = serde_cbor::from_slice(&protected)
                .map_err(|e| TrustError::service(format!("protected header is not a map: {e}")))?;
            header_alg(&header)
        };

        Ok(Self {
            algorithm: protected_alg.or_else(|| header_alg(&unprotected)),
            protected,
            payload,
            signature,
        })
    }

    /// Bytes covered by the signature.
    fn signed_bytes(protected: &[u8], payload: &[u8]) -> Result<Vec<u8>, serde_cbor::Error> {
        serde_cbor::to_vec(&Value::Array(vec![
            Value::Text(SIGNATURE1_CONTEXT.to_string()),
            Value::Bytes(protected.to_vec()),
            Value::Bytes(Vec::new()),
            Value::Bytes(payload.to_vec()),
        ]))
    }

    /// Verify the signature with `key`.
    ///
    /// A declared algorithm that does not match the key is rejected.
    pub fn verify(&self, key: &PublicKey) -> Result<(), TrustError> {
        if let Some(alg) = self.algorithm {
            if KeyAlgorithm::from_cose_id(alg) != Some(key.algorithm()) {
                warn!(
                    target: "healthcert::audit",
                    event = "envelope_algorithm_mismatch",
                    alg = %alg,
                    "Rejected signed envelope: algorithm does not match trust anchor"
                );
                return Err(TrustError::SignatureInvalid);
            }
        }

        let message = Self::signed_bytes(&self.protected, &self.payload)
            .map_err(|e| TrustError::service(format!("cannot encode signature structure: {e}")))?;

        if key.verify(&message, &self.signature) {
            Ok(())
        } else {
            warn!(
                target: "healthcert::audit",
                event = "signature_verification_failed",
                "Rejected signed envelope: signature does not verify"
            );
            Err(TrustError::SignatureInvalid)
        }
    }

    /// Produce an untagged EdDSA COSE_Sign1 over `payload`.
    pub fn sign_ed25519(payload: &[u8], signing_key: &SigningKey) -> Result<Vec<u8>> {
        let mut header = BTreeMap::new();
        header.insert(Value::Integer(HEADER_ALG), Value::Integer(KeyAlgorithm::EdDsa.cose_id()));
        let protected = serde_cbor::to_vec(&Value::Map(header))?;

        let message = Self::signed_bytes(&protected, payload)?;
        let signature = signing_key.sign(&message);

        serde_cbor::to_vec(&Value::Array(vec![
            Value::Bytes(protected),
            Value::Map(BTreeMap::new()),
            Value::Bytes(payload.to_vec()),
            Value::Bytes(signature.to_bytes().to_vec()),
        ]))
        .map_err(|e| anyhow!("Failed to encode COSE_Sign1: {}", e))
    }
}

/// Decode `bytes`, verify them against `key` and return the payload.
///
/// No time or content checks happen here.
pub fn verify_envelope(bytes: &[u8], key: &PublicKey) -> Result<Vec<u8>, TrustError> {
    let envelope = SignedEnvelope::decode(bytes)?;
    envelope.verify(key)?;
    Ok(envelope.payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use rand::RngCore;

    fn random_signing_key() -> SigningKey {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        SigningKey::from_bytes(&seed)
    }

    fn public_key(signing_key: &SigningKey) -> PublicKey {
        PublicKey::Ed25519(signing_key.verifying_key())
    }

    #[test]
    fn test_sign_and_verify() {
        let signing_key = random_signing_key();
        let envelope = SignedEnvelope::sign_ed25519(b"payload", &signing_key).unwrap();

        let payload = verify_envelope(&envelope, &public_key(&signing_key)).unwrap();
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_wrong_key_is_signature_invalid() {
        let envelope = SignedEnvelope::sign_ed25519(b"payload", &random_signing_key()).unwrap();
        let result = verify_envelope(&envelope, &public_key(&random_signing_key()));
        assert_eq!(result, Err(TrustError::SignatureInvalid));
    }

    #[test]
    fn test_tampered_payload_is_signature_invalid() {
        let signing_key = random_signing_key();
        let envelope = SignedEnvelope::sign_ed25519(b"payload", &signing_key).unwrap();

        let mut decoded = SignedEnvelope::decode(&envelope).unwrap();
        decoded.payload = b"other payload".to_vec();
        assert_eq!(decoded.verify(&public_key(&signing_key)), Err(TrustError::SignatureInvalid));
    }

    #[test]
    fn test_tagged_envelope_is_accepted() {
        let signing_key = random_signing_key();
        let untagged = SignedEnvelope::sign_ed25519(b"payload", &signing_key).unwrap();

        // 0xd2 = major type 6, tag 18
        let mut tagged = vec![0xd2];
        tagged.extend_from_slice(&untagged);

        let payload = verify_envelope(&tagged, &public_key(&signing_key)).unwrap();
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_garbage_is_service_error() {
        let result = verify_envelope(&[0xff, 0x00, 0x13], &public_key(&random_signing_key()));
        assert!(matches!(result, Err(TrustError::ServiceError(_))));
    }

    #[test]
    fn test_wrong_arity_is_service_error() {
        let bytes = serde_cbor::to_vec(&Value::Array(vec![Value::Bytes(vec![])])).unwrap();
        let result = SignedEnvelope::decode(&bytes);
        assert!(matches!(result, Err(TrustError::ServiceError(_))));
    }

    #[test]
    fn test_malformed_signature_is_signature_invalid() {
        let signing_key = random_signing_key();
        let bytes = serde_cbor::to_vec(&Value::Array(vec![
            Value::Bytes(vec![]),
            Value::Map(BTreeMap::new()),
            Value::Bytes(b"payload".to_vec()),
            Value::Text("not a signature".to_string()),
        ]))
        .unwrap();

        let result = verify_envelope(&bytes, &public_key(&signing_key));
        assert_eq!(result, Err(TrustError::SignatureInvalid));
    }

    #[test]
    fn test_algorithm_mismatch_is_signature_invalid() {
        let signing_key = random_signing_key();
        let envelope = SignedEnvelope::sign_ed25519(b"payload", &signing_key).unwrap();

        let mut decoded = SignedEnvelope::decode(&envelope).unwrap();
        assert_eq!(decoded.algorithm, Some(-8));
        decoded.algorithm = Some(KeyAlgorithm::Es256.cose_id());
        assert_eq!(decoded.verify(&public_key(&signing_key)), Err(TrustError::SignatureInvalid));
    }
}
