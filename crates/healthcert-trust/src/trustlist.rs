//! Trust list: the cached issuer signing keys.
//!
//! Wire document (CBOR):
//! `{ "entries": [ { "kid": bstr, "key": bstr, "types": [tstr]?,
//!    "notBefore": NumericDate?, "notAfter": NumericDate? } ] }`

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_cbor::Value;
use tracing::debug;

use crate::cwt::{numeric_date, FreshnessToken};

/// Certificate category a key may sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertType {
    Test,
    Vaccination,
    Recovery,
}

impl CertType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Vaccination => "vaccination",
            Self::Recovery => "recovery",
        }
    }
}

impl fmt::Display for CertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "test" => Ok(Self::Test),
            "vaccination" => Ok(Self::Vaccination),
            "recovery" => Ok(Self::Recovery),
            other => Err(anyhow!("Unknown certificate type: {}", other)),
        }
    }
}

/// One issuer signing key. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustListEntry {
    #[serde(with = "hex")]
    pub key_identifier: Vec<u8>,
    /// Raw key bytes, see [`crate::PublicKey::from_raw`]
    #[serde(with = "hex")]
    pub public_key: Vec<u8>,
    /// `None` means the key may sign any certificate type
    pub suitability: Option<BTreeSet<CertType>>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl TrustListEntry {
    /// `not_before <= now < not_after`, absent bounds unconstrained.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_none_or(|not_before| not_before <= now)
            && self.not_after.is_none_or(|not_after| now < not_after)
    }

    pub fn is_suitable_for(&self, cert_type: CertType) -> bool {
        self.suitability.as_ref().is_none_or(|types| types.contains(&cert_type))
    }

    /// Whether a credential token fits inside this key's validity window.
    ///
    /// Requires `not_before < iat < not_after` and `exp < not_after`.
    /// Returns `None` when the key or token lacks either bound.
    pub fn covers_token(&self, token: &FreshnessToken) -> Option<bool> {
        let not_before = self.not_before?;
        let not_after = self.not_after?;
        let issued_at = token.issued_at?;
        let expires_at = token.expires_at?;

        Some(not_before < issued_at && issued_at < not_after && not_after > expires_at)
    }

    fn from_cbor(value: &Value) -> Result<Self> {
        let Value::Map(fields) = value else {
            bail!("Trust list entry is not a map");
        };
        let field = |name: &str| fields.get(&Value::Text(name.to_string()));

        let key_identifier = match field("kid") {
            Some(Value::Bytes(kid)) if !kid.is_empty() => kid.clone(),
            _ => bail!("Trust list entry has no key identifier"),
        };
        let public_key = match field("key") {
            Some(Value::Bytes(key)) => key.clone(),
            _ => bail!("Trust list entry {} has no key material", hex::encode(&key_identifier)),
        };

        let suitability = match field("types") {
            None | Some(Value::Null) => None,
            Some(Value::Array(types)) => Some(
                types
                    .iter()
                    .filter_map(|t| match t {
                        Value::Text(name) => match name.parse::<CertType>() {
                            Ok(cert_type) => Some(cert_type),
                            Err(_) => {
                                debug!("Ignoring unknown certificate type '{}'", name);
                                None
                            }
                        },
                        _ => None,
                    })
                    .collect(),
            ),
            Some(_) => bail!("Trust list entry types are not an array"),
        };

        let date = |name: &str| -> Result<Option<DateTime<Utc>>> {
            match field(name) {
                None | Some(Value::Null) => Ok(None),
                Some(value) => numeric_date(value)
                    .map(Some)
                    .ok_or_else(|| anyhow!("Trust list entry {} is not a NumericDate", name)),
            }
        };

        Ok(Self {
            not_before: date("notBefore")?,
            not_after: date("notAfter")?,
            key_identifier,
            public_key,
            suitability,
        })
    }

    fn to_cbor(&self) -> Value {
        let mut fields = BTreeMap::new();
        fields.insert(Value::Text("kid".into()), Value::Bytes(self.key_identifier.clone()));
        fields.insert(Value::Text("key".into()), Value::Bytes(self.public_key.clone()));
        if let Some(types) = &self.suitability {
            let types = types.iter().map(|t| Value::Text(t.as_str().to_string())).collect();
            fields.insert(Value::Text("types".into()), Value::Array(types));
        }
        if let Some(not_before) = self.not_before {
            fields.insert(Value::Text("notBefore".into()), Value::Integer(not_before.timestamp().into()));
        }
        if let Some(not_after) = self.not_after {
            fields.insert(Value::Text("notAfter".into()), Value::Integer(not_after.timestamp().into()));
        }
        Value::Map(fields)
    }
}

/// Cached trust material.
///
/// Entries and content hash are only ever set together; a new list replaces
/// the old one wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustList {
    entries: HashMap<Vec<u8>, TrustListEntry>,
    content_hash: Vec<u8>,
}

impl TrustList {
    /// Empty list with no content hash
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a list, rejecting duplicate key identifiers.
    pub fn new(entries: Vec<TrustListEntry>, content_hash: Vec<u8>) -> Result<Self> {
        let mut by_kid = HashMap::with_capacity(entries.len());
        for entry in entries {
            let kid = entry.key_identifier.clone();
            if by_kid.insert(kid.clone(), entry).is_some() {
                bail!("Duplicate key identifier in trust list: {}", hex::encode(kid));
            }
        }
        Ok(Self { entries: by_kid, content_hash })
    }

    /// Decode a fetched trust list document. The content hash is left empty.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let document: Value = serde_cbor::from_slice(bytes).context("Trust list is not CBOR")?;
        let Value::Map(document) = document else {
            bail!("Trust list document is not a map");
        };

        let Some(Value::Array(items)) = document.get(&Value::Text("entries".to_string())) else {
            bail!("Trust list document has no entries array");
        };

        let entries = items.iter().map(TrustListEntry::from_cbor).collect::<Result<Vec<_>>>()?;
        Self::new(entries, Vec::new())
    }

    /// Encode as a trust list document, entries ordered by key identifier.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut entries: Vec<&TrustListEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.key_identifier.cmp(&b.key_identifier));

        let mut document = BTreeMap::new();
        document.insert(
            Value::Text("entries".to_string()),
            Value::Array(entries.into_iter().map(TrustListEntry::to_cbor).collect()),
        );
        Ok(serde_cbor::to_vec(&Value::Map(document))?)
    }

    /// Attach the content hash this list was accepted under.
    pub fn with_content_hash(mut self, content_hash: Vec<u8>) -> Self {
        self.content_hash = content_hash;
        self
    }

    pub fn get(&self, key_identifier: &[u8]) -> Option<&TrustListEntry> {
        self.entries.get(key_identifier)
    }

    pub fn content_hash(&self) -> &[u8] {
        &self.content_hash
    }

    pub fn entries(&self) -> impl Iterator<Item = &TrustListEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
