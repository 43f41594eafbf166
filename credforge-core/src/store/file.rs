//! File-backed cache storage.
//!
//! The whole cache is one JSON object (`key -> serialized entity`) kept in
//! memory and rewritten after every mutation.
//!
//! # Storage Location
//!
//! By default the cache lives at `~/.local/share/credforge/token_cache.json`
//! on Linux, `~/Library/Application Support/com.raibid-labs.credforge/` on
//! macOS and `%APPDATA%\raibid-labs\credforge\data\` on Windows.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::{CacheStorage, StoreError};

/// Disk-backed cache storage.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is safe to
/// share across threads via `Arc`.
pub struct FileStore {
    /// Path to the cache JSON file.
    path: PathBuf,

    /// In-memory copy of the file contents.
    data: Arc<RwLock<BTreeMap<String, String>>>,
}

impl FileStore {
    /// Get the default path of the cache file.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("com", "raibid-labs", "credforge")
            .ok_or(StoreError::DataDirUnavailable)?;

        Ok(dirs.data_dir().join("token_cache.json"))
    }

    /// Open the cache at the default location.
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(Self::default_path()?)
    }

    /// Open the cache at a specific path.
    ///
    /// Creates parent directories if they don't exist. A missing file is an
    /// empty cache.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current state to disk.
    fn save(&self, data: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }

    fn mutate<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut data = self.data.write().map_err(|e| StoreError::BackendError {
            message: format!("write lock poisoned: {}", e),
        })?;
        f(&mut data);
        self.save(&data)
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl CacheStorage for FileStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let data = self.data.read().map_err(|e| StoreError::BackendError {
            message: format!("read lock poisoned: {}", e),
        })?;
        Ok(data.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.mutate(|data| {
            data.insert(key.to_string(), value.to_string());
        })
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.mutate(|data| {
            data.remove(key);
        })
    }

    async fn get_keys(&self) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().map_err(|e| StoreError::BackendError {
            message: format!("read lock poisoned: {}", e),
        })?;
        Ok(data.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.mutate(|data| data.clear())
    }
}
