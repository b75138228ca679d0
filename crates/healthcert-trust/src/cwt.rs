//! Freshness tokens (CWT claims).
//!
//! The same token type proves the trust list is current (its subject is the
//! expected content hash) and, when the caller supplies one, time-bounds the
//! credential whose key is being resolved.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_cbor::Value;
use tracing::debug;

const CLAIM_ISS: i128 = 1;
const CLAIM_SUB: i128 = 2;
const CLAIM_EXP: i128 = 4;
const CLAIM_IAT: i128 = 6;

/// Signed, time-bounded assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessToken {
    pub issuer: Option<String>,
    /// For trust list tokens: the expected content hash
    pub subject: Vec<u8>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// RFC 8392 NumericDate: integer or float seconds, fractions truncated.
pub(crate) fn numeric_date(value: &Value) -> Option<DateTime<Utc>> {
    let seconds = match value {
        Value::Integer(seconds) => i64::try_from(*seconds).ok()?,
        Value::Float(seconds) if seconds.is_finite() => seconds.trunc() as i64,
        _ => return None,
    };
    DateTime::from_timestamp(seconds, 0)
}

impl FreshnessToken {
    pub fn new(subject: impl Into<Vec<u8>>) -> Self {
        Self { issuer: None, subject: subject.into(), issued_at: None, expires_at: None }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = Some(issued_at);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Decode a CWT claims payload.
    ///
    /// Returns `None` for malformed payloads and for tokens without a
    /// non-empty subject or with a malformed `iat`/`exp`. A malformed `iss`
    /// is dropped.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let claims: BTreeMap<Value, Value> = match serde_cbor::from_slice(payload) {
            Ok(claims) => claims,
            Err(e) => {
                debug!("Freshness token payload is not a CBOR map: {}", e);
                return None;
            }
        };

        let subject = match claims.get(&Value::Integer(CLAIM_SUB)) {
            Some(Value::Bytes(subject)) => subject.clone(),
            Some(Value::Text(subject)) => subject.as_bytes().to_vec(),
            _ => {
                debug!("Freshness token has no subject claim");
                return None;
            }
        };
        if subject.is_empty() {
            debug!("Freshness token has an empty subject claim");
            return None;
        }

        let issuer = match claims.get(&Value::Integer(CLAIM_ISS)) {
            Some(Value::Text(issuer)) => Some(issuer.clone()),
            _ => None,
        };

        // Absent dates are unbounded, malformed ones reject the token.
        let date = |claim: i128, name: &str| match claims.get(&Value::Integer(claim)) {
            None => Some(None),
            Some(value) => match numeric_date(value) {
                Some(date) => Some(Some(date)),
                None => {
                    debug!("Freshness token {} claim is not a NumericDate", name);
                    None
                }
            },
        };

        Some(Self {
            issuer,
            subject,
            issued_at: date(CLAIM_IAT, "iat")?,
            expires_at: date(CLAIM_EXP, "exp")?,
        })
    }

    /// Encode as a CWT claims map.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut claims = BTreeMap::new();
        if let Some(issuer) = &self.issuer {
            claims.insert(Value::Integer(CLAIM_ISS), Value::Text(issuer.clone()));
        }
        claims.insert(Value::Integer(CLAIM_SUB), Value::Bytes(self.subject.clone()));
        if let Some(expires_at) = self.expires_at {
            claims.insert(Value::Integer(CLAIM_EXP), Value::Integer(expires_at.timestamp().into()));
        }
        if let Some(issued_at) = self.issued_at {
            claims.insert(Value::Integer(CLAIM_IAT), Value::Integer(issued_at.timestamp().into()));
        }
        Ok(serde_cbor::to_vec(&Value::Map(claims))?)
    }

    /// `issued_at <= now`. A token without `iat` has no lower bound.
    pub fn is_already_valid(&self, now: DateTime<Utc>) -> bool {
        self.issued_at.is_none_or(|issued_at| issued_at <= now)
    }

    /// `now < expires_at`. A token without `exp` does not expire.
    pub fn is_not_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}
