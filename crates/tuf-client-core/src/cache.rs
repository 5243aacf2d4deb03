//! Metadata cache interface and an in-memory implementation.
//!
//! Entries are either a parsed metadata envelope or opaque bytes (root
//! history). The variant is recorded when the entry is written and returned
//! as-is when it is read; it is never guessed from the stored shape.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::metadata::SignedEnvelope;

/// Errors emitted by metadata caches.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A stored value carries an unknown or missing variant tag.
    #[error("cache entry '{key}' has an invalid tag")]
    InvalidTag { key: String },
    #[error("cache lock poisoned")]
    Poisoned,
}

/// A cached value.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    /// Parsed metadata envelope.
    Structured(SignedEnvelope),
    /// Opaque bytes, stored exactly as received.
    Raw(Vec<u8>),
}

impl CacheEntry {
    /// Returns the envelope of a structured entry.
    pub fn into_envelope(self) -> Option<SignedEnvelope> {
        match self {
            CacheEntry::Structured(envelope) => Some(envelope),
            CacheEntry::Raw(_) => None,
        }
    }
}

/// Durable key/value store for trusted metadata.
///
/// Writes to different keys are independent; callers order them.
pub trait MetadataCache: Send + Sync {
    /// Reads `key`, returning `Ok(None)` when it is absent.
    fn read(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
    /// Stores a parsed envelope under `key`.
    fn write(&self, key: &str, envelope: &SignedEnvelope) -> Result<(), CacheError>;
    /// Stores opaque bytes under `key`.
    fn write_raw(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError>;
    /// Removes `key`; removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Cache key of a top-level metadata file within `namespace`.
pub fn metadata_key(namespace: &str, file: &str) -> String {
    format!("{namespace}/{file}")
}

/// Cache key of a historical root within `namespace`.
pub fn root_history_key(namespace: &str, version: u64) -> String {
    format!("{namespace}/root_history/{version}.root.json")
}

/// Process-local cache; contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored keys in sorted order.
    pub fn keys(&self) -> Result<Vec<String>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn insert(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries
            .write()
            .map_err(|_| CacheError::Poisoned)?
            .insert(key.to_string(), entry);
        Ok(())
    }
}

impl MetadataCache for MemoryCache {
    fn read(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, envelope: &SignedEnvelope) -> Result<(), CacheError> {
        self.insert(key, CacheEntry::Structured(envelope.clone()))
    }

    fn write_raw(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        self.insert(key, CacheEntry::Raw(bytes.to_vec()))
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries
            .write()
            .map_err(|_| CacheError::Poisoned)?
            .remove(key);
        Ok(())
    }
}
