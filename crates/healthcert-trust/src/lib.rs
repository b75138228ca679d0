//! healthcert-trust - trust list lifecycle for health certificate verification
//!
//! This library keeps a locally cached list of issuer public keys, refreshes it
//! from a remote authority only when a signed freshness token says the content
//! changed, and resolves a certificate's key identifier to a usable public key.

pub mod clock;
pub mod config;
pub mod cose;
pub mod crypto;
pub mod cwt;
pub mod error;
pub mod service;
pub mod storage;
pub mod transport;
pub mod trustlist;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, TrustListConfig};
pub use crypto::{PublicKey, TrustAnchor};
pub use cwt::FreshnessToken;
pub use error::TrustError;
pub use service::{refresh_due, TrustListService, TrustListServiceBuilder};
pub use trustlist::{CertType, TrustList, TrustListEntry};

/// Result type for trust list operations
pub type Result<T> = std::result::Result<T, TrustError>;

/// Default interval between two network refresh attempts (1 hour)
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 3600;

/// Alias of the at-rest encryption key in secure key storage
pub const TRUST_LIST_KEY_ALIAS: &str = "healthcert-trustlist";
