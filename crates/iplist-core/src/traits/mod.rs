//! Core traits for the IP list sync system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`SourceFetcher`]: Fetch and parse membership feeds
//! - [`ListProvider`]: Read and mutate remote lists via provider APIs
//! - [`CacheStore`]: Persist per-pair fingerprints for incremental sync

pub mod cache_store;
pub mod list_provider;
pub mod source_fetcher;

pub use cache_store::{CacheRecord, CacheStore, CacheStoreFactory, cache_key};
pub use list_provider::{BulkMutation, ListHandle, ListPage, ListProvider, ListProviderFactory};
pub use source_fetcher::SourceFetcher;
