// # Cache Store Implementations
//
// Implementations of the CacheStore trait for different persistence strategies.

pub mod file;
pub mod memory;

pub use file::{FileCacheStore, FileCacheStoreFactory};
pub use memory::{MemoryCacheStore, MemoryCacheStoreFactory};
