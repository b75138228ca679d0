//! Error taxonomy shared with downstream certificate verification.

use thiserror::Error;

/// Terminal outcome of a refresh or key resolution.
///
/// Every variant maps to a stable code (see [`TrustError::code`]) that
/// certificate verification reports upwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustError {
    /// Transport failure, non-success response or undecodable data.
    #[error("trust list service error: {0}")]
    ServiceError(String),

    #[error("trust list signature is invalid")]
    SignatureInvalid,

    #[error("trust list freshness token is not yet valid")]
    NotYetValid,

    #[error("trust list freshness token has expired")]
    Expired,

    #[error("key identifier is not in the trust list")]
    KeyNotInTrustList,

    #[error("public key is outside its validity window")]
    PublicKeyExpired,

    #[error("public key is not suitable for this certificate type")]
    UnsuitablePublicKeyType,

    /// The credential's own token falls outside the signing key's window.
    #[error("credential token is outside the signing key's validity window")]
    CwtExpired,

    #[error("public key could not be created: {0}")]
    KeyCreationError(String),
}

impl TrustError {
    pub(crate) fn service(reason: impl Into<String>) -> Self {
        Self::ServiceError(reason.into())
    }

    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ServiceError(_) => "SERVICE_ERROR",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::NotYetValid => "NOT_YET_VALID",
            Self::Expired => "EXPIRED",
            Self::KeyNotInTrustList => "KEY_NOT_IN_TRUST_LIST",
            Self::PublicKeyExpired => "PUBLIC_KEY_EXPIRED",
            Self::UnsuitablePublicKeyType => "UNSUITABLE_PUBLIC_KEY_TYPE",
            Self::CwtExpired => "CWT_EXPIRED",
            Self::KeyCreationError(_) => "KEY_CREATION_ERROR",
        }
    }
}
