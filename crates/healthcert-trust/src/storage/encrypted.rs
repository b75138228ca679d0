//! Encrypted trust list file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::TrustListStore;
use crate::crypto::{encryption, SecretKeyStore};
use crate::trustlist::{TrustList, TrustListEntry};
use crate::TRUST_LIST_KEY_ALIAS;

/// File name of the sealed trust list inside the storage directory
pub const TRUST_LIST_FILE: &str = "trustlist.bin";

/// Plaintext form sealed to disk.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedTrustList {
    #[serde(with = "hex")]
    content_hash: Vec<u8>,
    entries: Vec<TrustListEntry>,
}

impl From<&TrustList> for PersistedTrustList {
    fn from(trust_list: &TrustList) -> Self {
        let mut entries: Vec<TrustListEntry> = trust_list.entries().cloned().collect();
        entries.sort_by(|a, b| a.key_identifier.cmp(&b.key_identifier));
        Self { content_hash: trust_list.content_hash().to_vec(), entries }
    }
}

/// Trust list sealed with XChaCha20-Poly1305 in a single file.
pub struct EncryptedFileStore {
    path: PathBuf,
    keys: Arc<dyn SecretKeyStore>,
}

impl EncryptedFileStore {
    pub fn new(dir: impl AsRef<Path>, keys: Arc<dyn SecretKeyStore>) -> Self {
        Self { path: dir.as_ref().join(TRUST_LIST_FILE), keys }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn try_store(&self, trust_list: &TrustList) -> Result<()> {
        let plaintext = serde_json::to_vec(&PersistedTrustList::from(trust_list))?;
        let key = self.keys.get_or_create(TRUST_LIST_KEY_ALIAS).context("At-rest key unavailable")?;
        let sealed = encryption::seal(&key, &plaintext)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write next to the target and rename so readers never see a torn file.
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &sealed).await.context("Failed to write trust list")?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .context("Failed to move trust list into place")?;
        Ok(())
    }

    async fn try_load(&self) -> Result<Option<TrustList>> {
        let sealed = match tokio::fs::read(&self.path).await {
            Ok(sealed) => sealed,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Failed to read trust list"),
        };

        let key = self.keys.get_or_create(TRUST_LIST_KEY_ALIAS).context("At-rest key unavailable")?;
        let plaintext = encryption::open(&key, &sealed)?;
        let persisted: PersistedTrustList =
            serde_json::from_slice(&plaintext).context("Persisted trust list is corrupt")?;

        Ok(Some(TrustList::new(persisted.entries, persisted.content_hash)?))
    }
}

#[async_trait]
impl TrustListStore for EncryptedFileStore {
    async fn store(&self, trust_list: &TrustList) {
        match self.try_store(trust_list).await {
            Ok(()) => debug!("Persisted trust list to {}", self.path.display()),
            Err(e) => error!("Failed to persist trust list, keeping it in memory only: {:#}", e),
        }
    }

    async fn load(&self) -> Option<TrustList> {
        match self.try_load().await {
            Ok(Some(trust_list)) => {
                info!(
                    "Loaded cached trust list ({} keys) from {}",
                    trust_list.len(),
                    self.path.display()
                );
                Some(trust_list)
            }
            Ok(None) => {
                debug!("No cached trust list at {}", self.path.display());
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable cached trust list: {:#}", e);
                None
            }
        }
    }
}

/// Process-local trust list store.
#[derive(Debug, Default)]
pub struct MemoryTrustListStore {
    stored: Mutex<Option<TrustList>>,
}

impl MemoryTrustListStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trust_list(trust_list: TrustList) -> Self {
        Self { stored: Mutex::new(Some(trust_list)) }
    }

    /// Last stored list
    pub fn stored(&self) -> Option<TrustList> {
        self.stored.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl TrustListStore for MemoryTrustListStore {
    async fn store(&self, trust_list: &TrustList) {
        *self.stored.lock().unwrap_or_else(PoisonError::into_inner) = Some(trust_list.clone());
    }

    async fn load(&self) -> Option<TrustList> {
        self.stored()
    }
}
