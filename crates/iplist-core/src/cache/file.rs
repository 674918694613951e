// # File Cache Store
//
// File-based implementation of CacheStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: the document is written to `<path>.tmp`, then renamed
// - Backup: the previous document is copied to `<path>.backup` before each replace
// - Recovery: a corrupted document falls back to the backup, then to an empty cache
//
// An empty or lost cache only costs one extra remote read per pair.
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "records": {
//     "0123abcd/blocklist": {
//       "fingerprint": "9f86d081884c7d65...",
//       "entry_count": 42,
//       "last_synced": "2025-01-09T12:00:00Z"
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::Error;
use crate::config::CacheStoreConfig;
use crate::entry::Fingerprint;
use crate::traits::cache_store::{CacheRecord, CacheStore, CacheStoreFactory, cache_key};

/// Cache file format version
const CACHE_FILE_VERSION: &str = "1.0";

/// Serializable cache file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CacheFileFormat {
    version: String,
    records: HashMap<String, CacheRecord>,
}

/// Why a cache document could not be loaded
enum LoadFailure {
    /// The file exists but is not a valid cache document
    Corrupt(String),
    /// The file could not be read at all
    Io(Error),
}

/// File-based cache store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use iplist_core::cache::FileCacheStore;
/// use iplist_core::{CacheStore, ListMembership};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileCacheStore::new("/var/lib/iplist/cache.json").await?;
///     let fingerprint = ListMembership::new().fingerprint();
///
///     store.put("account", "blocklist", &fingerprint, 0).await?;
///     assert!(store.should_skip("account", "blocklist", &fingerprint).await);
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileCacheStore {
    path: PathBuf,
    records: RwLock<HashMap<String, CacheRecord>>,
    // Serializes writers so temp file and backup never interleave
    write_lock: Mutex<()>,
}

impl FileCacheStore {
    /// Create or load a file cache store
    ///
    /// Parent directories are created when missing. A corrupted document is
    /// recovered from its backup, or replaced by an empty cache. A document
    /// that cannot be read at all (permissions, a directory at the path) also
    /// yields an empty cache; the failure resurfaces on the first `put`.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
            && let Err(e) = fs::create_dir_all(parent).await
        {
            // Writes will fail and be reported per pair; reads behave as misses
            tracing::warn!(
                "Failed to create cache directory {}: {}",
                parent.display(),
                e
            );
        }

        let records = Self::load_with_recovery(&path).await;

        Ok(Self {
            path,
            records: RwLock::new(records),
            write_lock: Mutex::new(()),
        })
    }

    async fn load_with_recovery(path: &Path) -> HashMap<String, CacheRecord> {
        let reason = match Self::load(path).await {
            Ok(records) => {
                tracing::debug!("Loaded cache from file: {} records", records.len());
                return records;
            }
            Err(LoadFailure::Io(e)) => {
                // Every pair is a cache miss; the run itself goes ahead
                tracing::warn!("{}. Starting with empty cache.", e);
                return HashMap::new();
            }
            Err(LoadFailure::Corrupt(reason)) => reason,
        };

        tracing::warn!("Cache file appears corrupted: {}. Attempting recovery from backup.", reason);

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No cache backup found. Starting with empty cache.");
            return HashMap::new();
        }

        match Self::load(&backup_path).await {
            Ok(records) => {
                tracing::info!("Recovered cache from backup: {} records", records.len());
                if let Err(e) = fs::copy(&backup_path, path).await {
                    tracing::error!("Failed to restore cache file from backup: {}", e);
                }
                records
            }
            Err(failure) => {
                let reason = match failure {
                    LoadFailure::Corrupt(reason) => reason,
                    LoadFailure::Io(e) => e.to_string(),
                };
                tracing::error!("Cache backup also unusable: {}. Starting with empty cache.", reason);
                HashMap::new()
            }
        }
    }

    async fn load(path: &Path) -> Result<HashMap<String, CacheRecord>, LoadFailure> {
        if !path.exists() {
            tracing::debug!("Cache file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadFailure::Io(Error::cache(format!(
                "Failed to read cache file {}: {}",
                path.display(),
                e
            )))
        })?;

        let document: CacheFileFormat = serde_json::from_str(&content)
            .map_err(|e| LoadFailure::Corrupt(format!("{}: {}", path.display(), e)))?;

        if document.version != CACHE_FILE_VERSION {
            tracing::warn!(
                "Cache file version mismatch: expected {}, got {}. Attempting to load anyway.",
                CACHE_FILE_VERSION,
                document.version
            );
        }

        Ok(document.records)
    }

    /// Write the current records atomically
    async fn persist(&self) -> Result<(), Error> {
        let _writer = self.write_lock.lock().await;

        let document = CacheFileFormat {
            version: CACHE_FILE_VERSION.to_string(),
            records: self.records.read().await.clone(),
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| Error::cache(format!("Failed to serialize cache: {e}")))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::cache(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::cache(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.sync_all().await.map_err(|e| {
                Error::cache(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists()
            && let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await
        {
            tracing::warn!("Failed to create cache backup: {}", e);
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::cache(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Cache written to {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        temp.into()
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf().into_os_string();
        backup.push(".backup");
        backup.into()
    }

    /// Path of the cache document
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, account_id: &str, list_name: &str) -> Result<Option<CacheRecord>, Error> {
        let records = self.records.read().await;
        Ok(records.get(&cache_key(account_id, list_name)).cloned())
    }

    async fn put(
        &self,
        account_id: &str,
        list_name: &str,
        fingerprint: &Fingerprint,
        entry_count: usize,
    ) -> Result<(), Error> {
        self.records.write().await.insert(
            cache_key(account_id, list_name),
            CacheRecord::new(fingerprint.clone(), entry_count),
        );
        self.persist().await
    }

    async fn delete(&self, account_id: &str, list_name: &str) -> Result<(), Error> {
        let removed = self
            .records
            .write()
            .await
            .remove(&cache_key(account_id, list_name));
        if removed.is_some() {
            self.persist().await
        } else {
            Ok(())
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, Error> {
        let mut keys: Vec<String> = self.records.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn flush(&self) -> Result<(), Error> {
        // Every mutation is written through
        Ok(())
    }
}

/// Factory for [`FileCacheStore`]
#[derive(Debug, Default)]
pub struct FileCacheStoreFactory;

#[async_trait]
impl CacheStoreFactory for FileCacheStoreFactory {
    async fn create(&self, config: &CacheStoreConfig) -> Result<Box<dyn CacheStore>, Error> {
        match config {
            CacheStoreConfig::File { path } => Ok(Box::new(FileCacheStore::new(path).await?)),
            other => Err(Error::config(format!(
                "File cache factory cannot build a '{}' cache",
                other.type_name()
            ))),
        }
    }
}
