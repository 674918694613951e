// # Memory Cache Store
//
// In-memory implementation of CacheStore. Nothing survives the process, so
// every pair is re-read on the next run. Used for tests and one-shot runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::CacheStoreConfig;
use crate::entry::Fingerprint;
use crate::traits::cache_store::{CacheRecord, CacheStore, CacheStoreFactory, cache_key};

/// In-memory cache store
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    inner: Arc<RwLock<HashMap<String, CacheRecord>>>,
}

impl MemoryCacheStore {
    /// Create a new empty memory cache store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Insert a record as-is (timestamps included)
    pub async fn insert_record(&self, account_id: &str, list_name: &str, record: CacheRecord) {
        self.inner
            .write()
            .await
            .insert(cache_key(account_id, list_name), record);
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, account_id: &str, list_name: &str) -> Result<Option<CacheRecord>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(&cache_key(account_id, list_name)).cloned())
    }

    async fn put(
        &self,
        account_id: &str,
        list_name: &str,
        fingerprint: &Fingerprint,
        entry_count: usize,
    ) -> Result<(), Error> {
        self.insert_record(
            account_id,
            list_name,
            CacheRecord::new(fingerprint.clone(), entry_count),
        )
        .await;
        Ok(())
    }

    async fn delete(&self, account_id: &str, list_name: &str) -> Result<(), Error> {
        self.inner
            .write()
            .await
            .remove(&cache_key(account_id, list_name));
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, Error> {
        let mut keys: Vec<String> = self.inner.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Factory for [`MemoryCacheStore`]
#[derive(Debug, Default)]
pub struct MemoryCacheStoreFactory;

#[async_trait]
impl CacheStoreFactory for MemoryCacheStoreFactory {
    async fn create(&self, _config: &CacheStoreConfig) -> Result<Box<dyn CacheStore>, Error> {
        Ok(Box::new(MemoryCacheStore::new()))
    }
}
