//! Last refresh timestamp, persisted as a single ISO-8601 value.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

/// Simple key-value storage for `lastUpdateTimestamp`.
///
/// Not lock-protected across processes; last writer wins.
pub trait RefreshStateStore: Send + Sync {
    fn get(&self) -> Option<DateTime<Utc>>;
    fn set(&self, last_update: DateTime<Utc>);
}

/// Timestamp stored as RFC 3339 text in a settings file.
#[derive(Debug, Clone)]
pub struct FileRefreshState {
    path: PathBuf,
}

impl FileRefreshState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_get(&self) -> Result<Option<DateTime<Utc>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).context("Failed to read refresh state")?;
        let last_update = DateTime::parse_from_rfc3339(raw.trim())
            .context("Refresh state is not an ISO-8601 timestamp")?;
        Ok(Some(last_update.with_timezone(&Utc)))
    }

    fn try_set(&self, last_update: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, last_update.to_rfc3339_opts(SecondsFormat::Millis, true))
            .context("Failed to write refresh state")
    }
}

impl RefreshStateStore for FileRefreshState {
    fn get(&self) -> Option<DateTime<Utc>> {
        self.try_get().unwrap_or_else(|e| {
            warn!("Treating trust list as never refreshed: {:#}", e);
            None
        })
    }

    fn set(&self, last_update: DateTime<Utc>) {
        if let Err(e) = self.try_set(last_update) {
            warn!("Failed to persist last trust list update: {:#}", e);
        }
    }
}

/// Process-local refresh state.
#[derive(Debug, Default)]
pub struct MemoryRefreshState {
    last_update: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryRefreshState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RefreshStateStore for MemoryRefreshState {
    fn get(&self) -> Option<DateTime<Utc>> {
        *self.last_update.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, last_update: DateTime<Utc>) {
        *self.last_update.lock().unwrap_or_else(PoisonError::into_inner) = Some(last_update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_state_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let state = FileRefreshState::new(dir.path().join("state").join("last_update"));
        assert_eq!(state.get(), None);

        let at = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
        state.set(at);
        assert_eq!(state.get(), Some(at));

        let raw = fs::read_to_string(state.path()).unwrap();
        assert_eq!(raw, "2023-11-14T22:13:20.250Z");
    }

    #[test]
    fn test_corrupt_state_reads_as_never() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_update");
        fs::write(&path, "yesterday-ish").unwrap();

        assert_eq!(FileRefreshState::new(path).get(), None);
    }

    #[test]
    fn test_memory_state() {
        let state = MemoryRefreshState::new();
        assert_eq!(state.get(), None);
        let at = DateTime::from_timestamp(42, 0).unwrap();
        state.set(at);
        assert_eq!(state.get(), Some(at));
    }
}
