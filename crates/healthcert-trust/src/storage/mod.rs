//! Durable state of the trust list service.
//!
//! Both stores are best effort: failures are logged inside the store and
//! never reach the caller of a refresh.

pub mod encrypted;
pub mod refresh_state;

use async_trait::async_trait;

use crate::trustlist::TrustList;

pub use encrypted::{EncryptedFileStore, MemoryTrustListStore, TRUST_LIST_FILE};
pub use refresh_state::{FileRefreshState, MemoryRefreshState, RefreshStateStore};

/// Persistence of the accepted trust list.
#[async_trait]
pub trait TrustListStore: Send + Sync {
    /// Persist `trust_list`. Failures are logged and swallowed.
    async fn store(&self, trust_list: &TrustList);

    /// Load the persisted list. Missing or unreadable data yields `None`.
    async fn load(&self) -> Option<TrustList>;
}
