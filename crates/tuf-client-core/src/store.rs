//! Sled-backed metadata cache.
//!
//! The database records the repository it was created for. Opening it for a
//! different repository, or finding it damaged on disk, discards the previous
//! contents so metadata from unrelated repositories is never mixed.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Config as SledConfig, Db, Tree};

use crate::cache::{CacheEntry, CacheError, MetadataCache};
use crate::metadata::SignedEnvelope;

/// Tree name dedicated to the identity record.
const META_TREE: &str = "__meta";
/// Key for the JSON-encoded [`StoreIdentity`] record.
const META_KEY: &[u8] = b"meta.json";
/// Tree holding cached metadata entries.
const METADATA_TREE: &str = "metadata";

/// Leading byte of a structured (JSON envelope) entry.
const TAG_STRUCTURED: u8 = 1;
/// Leading byte of a raw entry.
const TAG_RAW: u8 = 2;

/// Identity persisted alongside the embedded database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreIdentity {
    /// Repository whose metadata the store holds.
    pub repository_url: String,
    /// When the store was created.
    pub creation_time: DateTime<Utc>,
}

/// Persistent [`MetadataCache`] backed by sled.
#[derive(Debug)]
pub struct SledCache {
    db: Db,
    tree: Tree,
    path: PathBuf,
}

impl SledCache {
    /// Opens (or creates) a cache at `path` for `repository_url`.
    pub fn open<P, S>(path: P, repository_url: S) -> Result<Self, CacheError>
    where
        P: AsRef<Path>,
        S: AsRef<str>,
    {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                // sled does not create intermediate directories automatically.
                fs::create_dir_all(parent)?;
            }
        }
        let repository_url = repository_url.as_ref();

        let db = match sled_config(&path).open() {
            Ok(db) => db,
            Err(sled::Error::Io(err)) => {
                tracing::warn!(path = %path.display(), error = %err, "tuf: cache unreadable, recreating");
                reset_path(&path)?;
                sled_config(&path).open()?
            }
            Err(other) => return Err(CacheError::Db(other)),
        };

        let store = Self::from_db(db, path.clone())?;
        match store.identity()? {
            Some(identity) if identity.repository_url == repository_url => Ok(store),
            Some(identity) => {
                tracing::info!(
                    previous = %identity.repository_url,
                    current = %repository_url,
                    "tuf: cache belongs to another repository, discarding"
                );
                drop(store);
                reset_path(&path)?;
                let store = Self::from_db(sled_config(&path).open()?, path)?;
                store.write_identity(repository_url)?;
                Ok(store)
            }
            None => {
                store.write_identity(repository_url)?;
                Ok(store)
            }
        }
    }

    /// Opens an in-memory cache (ephemeral across restarts).
    pub fn open_ephemeral<S: AsRef<str>>(repository_url: S) -> Result<Self, CacheError> {
        let db = SledConfig::new().temporary(true).open()?;
        let store = Self::from_db(db, PathBuf::new())?;
        store.write_identity(repository_url.as_ref())?;
        Ok(store)
    }

    /// Returns the filesystem path backing the cache.
    ///
    /// Ephemeral caches return an empty path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the identity record, if one was written.
    pub fn identity(&self) -> Result<Option<StoreIdentity>, CacheError> {
        let tree = self.db.open_tree(META_TREE)?;
        match tree.get(META_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<(), CacheError> {
        self.db.flush()?;
        Ok(())
    }

    fn from_db(db: Db, path: PathBuf) -> Result<Self, CacheError> {
        let tree = db.open_tree(METADATA_TREE)?;
        Ok(Self { db, tree, path })
    }

    fn write_identity(&self, repository_url: &str) -> Result<(), CacheError> {
        let identity = StoreIdentity {
            repository_url: repository_url.to_owned(),
            creation_time: Utc::now(),
        };
        let tree = self.db.open_tree(META_TREE)?;
        tree.insert(META_KEY, serde_json::to_vec(&identity)?)?;
        tree.flush()?;
        Ok(())
    }

    fn insert_tagged(&self, key: &str, tag: u8, payload: &[u8]) -> Result<(), CacheError> {
        let mut value = Vec::with_capacity(payload.len() + 1);
        value.push(tag);
        value.extend_from_slice(payload);
        self.tree.insert(key.as_bytes(), value)?;
        Ok(())
    }
}

impl MetadataCache for SledCache {
    fn read(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let Some(value) = self.tree.get(key.as_bytes())? else {
            return Ok(None);
        };
        match value.split_first() {
            Some((&TAG_STRUCTURED, payload)) => {
                Ok(Some(CacheEntry::Structured(serde_json::from_slice(payload)?)))
            }
            Some((&TAG_RAW, payload)) => Ok(Some(CacheEntry::Raw(payload.to_vec()))),
            _ => Err(CacheError::InvalidTag {
                key: key.to_string(),
            }),
        }
    }

    fn write(&self, key: &str, envelope: &SignedEnvelope) -> Result<(), CacheError> {
        self.insert_tagged(key, TAG_STRUCTURED, &serde_json::to_vec(envelope)?)
    }

    fn write_raw(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        self.insert_tagged(key, TAG_RAW, bytes)
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.tree.remove(key.as_bytes())?;
        Ok(())
    }
}

/// Builds a sled configuration using the provided filesystem path.
fn sled_config(path: &Path) -> SledConfig {
    SledConfig::new()
        .path(path)
        .cache_capacity(64 * 1024 * 1024)
}

/// Deletes the database file or directory to start from a clean slate.
fn reset_path(path: &Path) -> Result<(), CacheError> {
    if path.exists() {
        if path.is_dir() {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}
