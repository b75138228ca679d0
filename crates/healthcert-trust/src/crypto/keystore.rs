//! Secure storage of at-rest encryption keys.
//!
//! Keys are addressed by alias and created on first use.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rand::RngCore;

use super::encryption::KEY_LEN;

/// Holds symmetric keys by alias.
pub trait SecretKeyStore: Send + Sync {
    /// Return the key stored under `alias`, creating it if missing.
    fn get_or_create(&self, alias: &str) -> Result<[u8; KEY_LEN]>;
}

fn generate_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Key store backed by one owner-only file per alias.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key_path(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{alias}.key"))
    }
}

fn load_key(path: &Path) -> Result<[u8; KEY_LEN]> {
    let bytes = fs::read(path).context("Failed to read key file")?;

    if bytes.len() != KEY_LEN {
        anyhow::bail!("Invalid key file: expected {} bytes, got {}", KEY_LEN, bytes.len());
    }

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes);
    Ok(key)
}

fn save_key(key: &[u8; KEY_LEN], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).context("Failed to create key file")?;
    std::io::Write::write_all(&mut file, key).context("Failed to write key file")?;
    file.sync_all()?;
    Ok(())
}

impl SecretKeyStore for FileKeyStore {
    fn get_or_create(&self, alias: &str) -> Result<[u8; KEY_LEN]> {
        let path = self.key_path(alias);

        if path.exists() {
            tracing::debug!("Loading at-rest key '{}' from: {}", alias, path.display());
            load_key(&path)
        } else {
            tracing::info!("Generating at-rest key '{}' at: {}", alias, path.display());
            let key = generate_key();
            save_key(&key, &path)?;
            Ok(key)
        }
    }
}

/// Process-local key store.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<String, [u8; KEY_LEN]>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretKeyStore for MemoryKeyStore {
    fn get_or_create(&self, alias: &str) -> Result<[u8; KEY_LEN]> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(*keys.entry(alias.to_string()).or_insert_with(generate_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_creates_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("keys"));

        let first = store.get_or_create("trustlist").unwrap();
        let second = store.get_or_create("trustlist").unwrap();
        assert_eq!(first, second);

        let other = store.get_or_create("other").unwrap();
        assert_ne!(first, other);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path());
        store.get_or_create("trustlist").unwrap();

        let mode = fs::metadata(dir.path().join("trustlist.key")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupt_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("trustlist.key"), b"short").unwrap();

        let store = FileKeyStore::new(dir.path());
        assert!(store.get_or_create("trustlist").is_err());
    }

    #[test]
    fn test_memory_store_is_stable_per_alias() {
        let store = MemoryKeyStore::new();
        assert_eq!(store.get_or_create("a").unwrap(), store.get_or_create("a").unwrap());
        assert_ne!(store.get_or_create("a").unwrap(), store.get_or_create("b").unwrap());
    }
}
