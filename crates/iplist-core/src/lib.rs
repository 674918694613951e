// # iplist-core
//
// Core library for synchronizing remote IP lists from external feeds.
//
// ## Architecture Overview
//
// - **SourceFetcher**: Trait for fetching feeds into canonical memberships
// - **ListProvider**: Trait for reading and bulk-mutating remote lists
// - **CacheStore**: Trait for per-pair fingerprint persistence (incremental sync)
// - **ListReader**: Paginated, all-or-nothing remote read
// - **MutationClient**: Single bulk mutation per pair with bounded backoff
// - **SyncEngine**: Orchestrates fetch → skip check → read → diff → mutate → persist
// - **ProviderRegistry**: Plugin-based registry for providers and cache stores
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from API and feed I/O
// 2. **Failure Isolation**: One failing pair never aborts the run
// 3. **Plugin-Based**: Providers are registered by name, no hard-coded if-else
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Budgeted**: Every remote request of an account draws on one request budget

pub mod budget;
pub mod cache;
pub mod config;
pub mod diff;
pub mod engine;
pub mod entry;
pub mod error;
pub mod feed;
pub mod mutation;
pub mod reader;
pub mod registry;
pub mod report;
pub mod timer;
pub mod traits;

// Re-export core types for convenience
pub use budget::{AccountBudget, BudgetRegistry};
pub use cache::{FileCacheStore, MemoryCacheStore};
pub use config::{
    AccountConfig, CacheStoreConfig, EngineConfig, FeedFormat, ListConfig, ProviderConfig,
    SourceDescriptor, SyncConfig,
};
pub use diff::{SyncDelta, diff};
pub use engine::{EngineEvent, SyncEngine, SyncStage};
pub use entry::{Entry, Fingerprint, ListMembership, canonicalize};
pub use error::{Error, MutationError, Result};
pub use feed::FetchedMembership;
pub use mutation::{BackoffPolicy, MutationClient, MutationResult};
pub use reader::{ListReader, RemoteList};
pub use registry::ProviderRegistry;
pub use report::{LogReportSink, Notifier, PairReport, ReportSink, RunReport, SyncOutcome};
pub use timer::{Timer, TokioTimer};
pub use traits::{
    BulkMutation, CacheRecord, CacheStore, ListHandle, ListPage, ListProvider, SourceFetcher,
};
