//! Cache storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`CacheStorage`] - Trait for key/value storage backends used by the cache
//! - [`MemoryStore`] - In-memory implementation
//! - [`FileStore`] - JSON-file implementation that survives restarts
//! - [`create_store`] - Helper to select a backend
//!
//! The engine never interprets storage keys itself; key formats are owned by
//! [`CacheManager`](crate::cache::CacheManager).
//!
//! # Example
//!
//! ```rust,ignore
//! use credforge_core::store::{CacheStorage, create_store};
//!
//! let store = create_store(None);
//! store.set_item("appmetadata-login.microsoftonline.com-app", "{}").await?;
//! let keys = store.get_keys().await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is zeroed when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O error reading or writing a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Platform data directory not available.
    #[error("data directory not available")]
    DataDirUnavailable,
}

/// Key/value storage capability consumed by the cache.
///
/// Values are opaque strings (serialized JSON entities). Implementations
/// include:
/// - [`MemoryStore`] - In-memory storage
/// - [`FileStore`] - A single JSON document on disk
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store a value at the given key, overwriting any existing value.
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a value by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;

    /// List every stored key.
    async fn get_keys(&self) -> Result<Vec<String>, StoreError>;

    /// Remove every stored key.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn contains_key(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get_item(key).await?.is_some())
    }
}

/// Create a cache storage backend.
///
/// - `Some(path)`: a [`FileStore`] at that path, falling back to memory with
///   a warning if the file cannot be opened
/// - `None`: a [`MemoryStore`]; nothing persists across restarts
pub fn create_store(path: Option<PathBuf>) -> Arc<dyn CacheStorage> {
    if let Some(path) = path {
        match FileStore::open(path.clone()) {
            Ok(store) => {
                tracing::info!(path = %path.display(), "Using file-backed token cache");
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!(
                    "Token cache file unavailable ({}), falling back to memory store. \
                     Tokens will not persist across restarts.",
                    e
                );
            }
        }
    }

    tracing::debug!("Using in-memory token cache");
    Arc::new(MemoryStore::new())
}
