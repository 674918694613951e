//! Plugin-based provider registry
//!
//! List providers and cache stores are registered by name at startup and
//! instantiated from configuration, so the daemon never hard-codes which
//! implementations exist.
//!
//! ## Registration
//!
//! Provider crates expose a `register` function:
//!
//! ```rust,ignore
//! // In iplist-provider-cloudflare
//! pub fn register(registry: &ProviderRegistry) {
//!     registry.register_provider("cloudflare", Box::new(CloudflareFactory));
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::cache::{FileCacheStoreFactory, MemoryCacheStoreFactory};
use crate::config::{CacheStoreConfig, ProviderConfig};
use crate::error::{Error, Result};
use crate::traits::{CacheStore, CacheStoreFactory, ListProvider, ListProviderFactory};

/// Registry of list provider and cache store factories
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn ListProviderFactory>>>,
    cache_stores: RwLock<HashMap<String, Arc<dyn CacheStoreFactory>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in `file` and `memory` cache stores
    pub fn with_builtin_cache_stores() -> Self {
        let registry = Self::new();
        registry.register_cache_store("file", Box::new(FileCacheStoreFactory));
        registry.register_cache_store("memory", Box::new(MemoryCacheStoreFactory));
        registry
    }

    /// Register a list provider factory under `name`
    pub fn register_provider(&self, name: impl Into<String>, factory: Box<dyn ListProviderFactory>) {
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::from(factory));
    }

    /// Register a cache store factory under `name`
    pub fn register_cache_store(&self, name: impl Into<String>, factory: Box<dyn CacheStoreFactory>) {
        self.cache_stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::from(factory));
    }

    /// Create a list provider from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn ListProvider>)`: Created provider instance
    /// - `Err(Error)`: If the provider type is not registered or creation fails
    pub fn create_provider(&self, config: &ProviderConfig) -> Result<Box<dyn ListProvider>> {
        let provider_type = config.type_name();
        let factory = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown provider type: {provider_type}")))?;

        factory.create(config)
    }

    /// Create a cache store from configuration
    pub async fn create_cache_store(&self, config: &CacheStoreConfig) -> Result<Box<dyn CacheStore>> {
        let store_type = config.type_name();
        // Lock released before the async create
        let factory = self
            .cache_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(store_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown cache store type: {store_type}")))?;

        factory.create(config).await
    }

    /// List all registered provider types
    pub fn list_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// List all registered cache store types
    pub fn list_cache_stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .cache_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Check if a provider type is registered
    pub fn has_provider(&self, name: &str) -> bool {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Check if a cache store type is registered
    pub fn has_cache_store(&self, name: &str) -> bool {
        self.cache_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}
