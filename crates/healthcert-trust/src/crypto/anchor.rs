//! Trust anchor for the detached trust list signature.
//!
//! The anchor is an X.509 certificate compiled into the crate (or supplied
//! through configuration). Only its subject public key is used.

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose, Engine};
use x509_parser::parse_x509_certificate;

use super::keys::PublicKey;

/// Base64 DER certificate of the trust list signer.
pub const EMBEDDED_TRUST_ANCHOR: &str = "MIIBrTCCAV+gAwIBAgIUUVxAA6tOj0+lkWrIZySu0X232cEwBQYDK2VwMEwxCzAJBgNVBAYTAkFUMSEwHwYDVQQKDBhIZWFsdGggQ2VydGlmaWNhdGUgVHJ1c3QxGjAYBgNVBAMMEVRydXN0IExpc3QgU2lnbmVyMB4XDTI2MTAxOTA5NTY0MVoXDTM2MTAxNjA5NTY0MVowTDELMAkGA1UEBhMCQVQxITAfBgNVBAoMGEhlYWx0aCBDZXJ0aWZpY2F0ZSBUcnVzdDEaMBgGA1UEAwwRVHJ1c3QgTGlzdCBTaWduZXIwKjAFBgMrZXADIQDu+OKkH4l4uGNeuurJD4W6KFgnHs5QDvmzrbE0b/oNG6NTMFEwHQYDVR0OBBYEFN+or/qEFzQMC0ovHN011VpRUqCJMB8GA1UdIwQYMBaAFN+or/qEFzQMC0ovHN011VpRUqCJMA8GA1UdEwEB/wQFMAMBAf8wBQYDK2VwA0EAjRw+3faAOjGjXZBkir0nUxKiAhoq+odjgTDt5NhiFUwmfewQXidwY/fW4SKrbY1NYEZd/v0+iXci/XSioVyVCg==";

const OID_ED25519: &str = "1.3.101.112";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";

/// Root public key that verifies the signature resource.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    key: PublicKey,
    subject: String,
}

impl TrustAnchor {
    /// Anchor compiled into the crate.
    pub fn embedded() -> Result<Self> {
        Self::from_certificate_base64(EMBEDDED_TRUST_ANCHOR)
    }

    pub fn from_certificate_base64(encoded: &str) -> Result<Self> {
        let der = general_purpose::STANDARD
            .decode(encoded.trim())
            .context("Trust anchor is not valid base64")?;
        Self::from_certificate_der(&der)
    }

    /// Extract the subject public key of a DER certificate.
    ///
    /// Ed25519 and EC P-256 subject keys are supported.
    pub fn from_certificate_der(der: &[u8]) -> Result<Self> {
        let (_, certificate) = parse_x509_certificate(der)
            .map_err(|e| anyhow!("Invalid trust anchor certificate: {}", e))?;

        let spki = certificate.public_key();
        let algorithm = spki.algorithm.algorithm.to_id_string();
        let raw_key = spki.subject_public_key.data.as_ref();

        let key = match algorithm.as_str() {
            OID_ED25519 | OID_EC_PUBLIC_KEY => {
                PublicKey::from_raw(raw_key).context("Unusable trust anchor key")?
            }
            other => bail!("Unsupported trust anchor key algorithm: {}", other),
        };

        Ok(Self { key, subject: certificate.subject().to_string() })
    }

    /// Anchor from an already known key.
    pub fn from_public_key(key: PublicKey) -> Self {
        Self { key, subject: String::new() }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key
    }

    /// Certificate subject, empty for anchors built from a bare key.
    pub fn subject(&self) -> &str {
        &self.subject
    }
}
