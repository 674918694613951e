// # Cache Store Trait
//
// Persists the fingerprint of the last successfully synchronized membership
// for each (account, list) pair. A matching fingerprint lets the engine skip
// the remote read and mutation entirely.
//
// ## Implementations
//
// - `FileCacheStore`: JSON file with atomic replace and backup recovery
// - `MemoryCacheStore`: non-persistent, for tests and one-shot runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entry::Fingerprint;

/// Build the key under which a pair is stored
pub fn cache_key(account_id: &str, list_name: &str) -> String {
    format!("{account_id}/{list_name}")
}

/// Cached state of one pair
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheRecord {
    /// Fingerprint of the membership last pushed
    pub fingerprint: Fingerprint,
    /// Number of entries in that membership
    #[serde(default)]
    pub entry_count: usize,
    /// When the pair was last synchronized
    pub last_synced: DateTime<Utc>,
}

impl CacheRecord {
    /// Create a record stamped with the current time
    pub fn new(fingerprint: Fingerprint, entry_count: usize) -> Self {
        Self {
            fingerprint,
            entry_count,
            last_synced: Utc::now(),
        }
    }

    /// Check if the record is stale (older than given duration)
    pub fn is_stale(&self, max_age: chrono::Duration) -> bool {
        Utc::now().signed_duration_since(self.last_synced) > max_age
    }
}

/// Trait for cache store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get the cached record of a pair
    async fn get(
        &self,
        account_id: &str,
        list_name: &str,
    ) -> Result<Option<CacheRecord>, crate::Error>;

    /// Record a successful sync of a pair
    async fn put(
        &self,
        account_id: &str,
        list_name: &str,
        fingerprint: &Fingerprint,
        entry_count: usize,
    ) -> Result<(), crate::Error>;

    /// Forget a pair
    async fn delete(&self, account_id: &str, list_name: &str) -> Result<(), crate::Error>;

    /// List all cached keys (`account/list`)
    async fn list_keys(&self) -> Result<Vec<String>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;

    /// Whether the pair's cached fingerprint equals `fingerprint`
    ///
    /// Read errors are logged and treated as a miss.
    async fn should_skip(&self, account_id: &str, list_name: &str, fingerprint: &Fingerprint) -> bool {
        self.should_skip_within(account_id, list_name, fingerprint, None)
            .await
    }

    /// Like [`should_skip`](Self::should_skip), ignoring records older than `max_age`
    async fn should_skip_within(
        &self,
        account_id: &str,
        list_name: &str,
        fingerprint: &Fingerprint,
        max_age: Option<chrono::Duration>,
    ) -> bool {
        match self.get(account_id, list_name).await {
            Ok(Some(record)) => {
                if let Some(max_age) = max_age
                    && record.is_stale(max_age)
                {
                    tracing::debug!(
                        "Cache record for {} is stale, forcing re-read",
                        cache_key(account_id, list_name)
                    );
                    return false;
                }
                record.fingerprint == *fingerprint
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    "Cache read failed for {}: {}. Treating as miss.",
                    cache_key(account_id, list_name),
                    e
                );
                false
            }
        }
    }
}

/// Helper trait for constructing cache stores from configuration
#[async_trait]
pub trait CacheStoreFactory: Send + Sync {
    /// Create a CacheStore instance from configuration
    async fn create(
        &self,
        config: &crate::config::CacheStoreConfig,
    ) -> Result<Box<dyn CacheStore>, crate::Error>;
}
