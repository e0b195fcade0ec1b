//! Durable task snapshots.
//!
//! [`PersistenceStore`] writes the [`TaskSnapshot`] as JSON under a fixed
//! key on every mutation and restores it on startup, discarding
//! snapshots older than [`SNAPSHOT_MAX_AGE`]. The backing [`Storage`] is
//! a port; [`FileStorage`] and [`MemoryStorage`] are provided.
//!
//! Storage failures are logged and swallowed. A failed save never
//! blocks a state transition.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use batchgen_core::snapshot::SNAPSHOT_MAX_AGE;
use batchgen_core::TaskSnapshot;

/// Key the task snapshot is stored under.
pub const STORAGE_KEY: &str = "websocket_task_state";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),
}

/// Key/value storage for serialized snapshots.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Process-local storage. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// One `<key>.json` file per key under `dir`.
///
/// Writes go to a temporary file that is renamed into place, so a crash
/// mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

/// Keys become file names; restrict them to a safe character set.
fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if !is_safe_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir)?;

        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Saves and restores the task snapshot.
#[derive(Clone)]
pub struct PersistenceStore {
    storage: Arc<dyn Storage>,
    key: String,
    max_age: Duration,
}

impl PersistenceStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            key: STORAGE_KEY.to_string(),
            max_age: SNAPSHOT_MAX_AGE,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stamp `snapshot` with the current time and overwrite the stored copy.
    pub fn save(&self, snapshot: &mut TaskSnapshot) {
        self.save_at(snapshot, chrono::Utc::now().timestamp_millis());
    }

    pub fn save_at(&self, snapshot: &mut TaskSnapshot, now_ms: i64) {
        snapshot.timestamp = now_ms;

        let json = match serde_json::to_string(snapshot) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(key = %self.key, error = %e, "Failed to encode task snapshot");
                return;
            }
        };

        match self.storage.set(&self.key, &json) {
            Ok(()) => tracing::trace!(key = %self.key, status = %snapshot.status, "Task snapshot saved"),
            Err(e) => tracing::warn!(key = %self.key, error = %e, "Failed to save task snapshot"),
        }
    }

    /// Load the stored snapshot unless it is absent, stale, or unreadable.
    pub fn restore(&self) -> Option<TaskSnapshot> {
        self.restore_at(chrono::Utc::now().timestamp_millis())
    }

    pub fn restore_at(&self, now_ms: i64) -> Option<TaskSnapshot> {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to read task snapshot");
                return None;
            }
        };

        let snapshot: TaskSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Discarding unreadable task snapshot");
                self.clear();
                return None;
            }
        };

        if snapshot.is_stale(now_ms, self.max_age) {
            tracing::info!(
                key = %self.key,
                age_ms = snapshot.age_ms(now_ms),
                "Discarding stale task snapshot",
            );
            self.clear();
            return None;
        }

        tracing::info!(
            key = %self.key,
            status = %snapshot.status,
            entities = snapshot.entities.len(),
            articles = snapshot.articles.len(),
            "Task snapshot restored",
        );
        Some(snapshot)
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(&self.key) {
            tracing::warn!(key = %self.key, error = %e, "Failed to clear task snapshot");
        }
    }
}
