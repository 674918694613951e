//! Configuration types for the IP list sync system
//!
//! This module defines all configuration structures used throughout the crate.
//! Configuration is loaded once per run and is read-only during synchronization.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Main sync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Remote list provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Cache store configuration
    #[serde(default)]
    pub cache: CacheStoreConfig,

    /// Accounts and the lists managed in each
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Mask account identifiers in logs and reports
    #[serde(default)]
    pub anonymize: bool,
}

impl SyncConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML configuration document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, crate::Error> {
        serde_yaml::from_str(yaml)
            .map_err(|e| crate::Error::config(format!("Invalid configuration file: {e}")))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.accounts.is_empty() {
            return Err(crate::Error::config("No accounts configured"));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            account.validate()?;
            for list in &account.lists {
                if !seen.insert((account.id.as_str(), list.name.as_str())) {
                    return Err(crate::Error::config(format!(
                        "List '{}' is configured twice for account {}",
                        list.name, account.id
                    )));
                }
            }
        }

        self.provider.validate()?;
        self.engine.validate()?;

        Ok(())
    }

    /// Number of enabled (account, list) pairs
    pub fn enabled_pairs(&self) -> usize {
        self.accounts
            .iter()
            .map(|a| a.lists.iter().filter(|l| l.enabled).count())
            .sum()
    }
}

/// One account and the lists synchronized in it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Provider account identifier
    pub id: String,

    /// Human-readable name (used in reports)
    #[serde(default)]
    pub name: Option<String>,

    /// Lists to synchronize, in processing order
    #[serde(default)]
    pub lists: Vec<ListConfig>,
}

impl AccountConfig {
    /// Create a new account configuration
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            lists: Vec::new(),
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a list
    pub fn with_list(mut self, list: ListConfig) -> Self {
        self.lists.push(list);
        self
    }

    /// Name if set, id otherwise
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.id.trim().is_empty() {
            return Err(crate::Error::config("Account id cannot be empty"));
        }
        for list in &self.lists {
            list.validate(&self.id)?;
        }
        Ok(())
    }
}

/// One remote list and the feeds that define its membership
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListConfig {
    /// Remote list name
    pub name: String,

    /// Feeds whose union is the desired membership
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,

    /// Webhook notified with this list's outcome
    #[serde(default)]
    pub webhook: Option<String>,

    /// Whether this list is synchronized
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ListConfig {
    /// Create a new list configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
            webhook: None,
            enabled: true,
        }
    }

    /// Add a source feed
    pub fn with_source(mut self, source: SourceDescriptor) -> Self {
        self.sources.push(source);
        self
    }

    /// Set the notification webhook
    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook = Some(url.into());
        self
    }

    /// Enable or disable the list
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn validate(&self, account_id: &str) -> Result<(), crate::Error> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::config(format!(
                "List name cannot be empty (account {account_id})"
            )));
        }
        if self.sources.is_empty() {
            return Err(crate::Error::config(format!(
                "List '{}' in account {} has no sources",
                self.name, account_id
            )));
        }
        for source in &self.sources {
            source.validate()?;
        }
        if let Some(webhook) = &self.webhook
            && !is_http_url(webhook)
        {
            return Err(crate::Error::config(format!(
                "Webhook for list '{}' must be an http(s) URL",
                self.name
            )));
        }
        Ok(())
    }
}

/// A single feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Feed location (http, https or file URL)
    pub url: String,

    /// How the feed body is parsed
    pub format: FeedFormat,

    /// Member of each JSON element holding the IP value
    #[serde(default = "default_field")]
    pub field: String,

    /// Accept a feed with no entries
    #[serde(default)]
    pub allow_empty: bool,
}

impl SourceDescriptor {
    /// Create a new source descriptor
    pub fn new(url: impl Into<String>, format: FeedFormat) -> Self {
        Self {
            url: url.into(),
            format,
            field: default_field(),
            allow_empty: false,
        }
    }

    /// Set the JSON field name
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    /// Allow an empty feed
    pub fn with_allow_empty(mut self, allow_empty: bool) -> Self {
        self.allow_empty = allow_empty;
        self
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.url.is_empty() {
            return Err(crate::Error::config("Source URL cannot be empty"));
        }
        if !is_http_url(&self.url) && !self.url.starts_with("file://") {
            return Err(crate::Error::config(format!(
                "Source URL must use http, https or file scheme. Got: {}",
                self.url
            )));
        }
        if self.format == FeedFormat::Json && self.field.is_empty() {
            return Err(crate::Error::config(format!(
                "JSON source {} needs a non-empty field",
                self.url
            )));
        }
        Ok(())
    }
}

/// Feed body format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    /// Sequence of JSON elements carrying an IP field
    #[serde(alias = "structured")]
    Json,
    /// One entry per line
    #[serde(alias = "plaintext", alias = "txt")]
    Text,
}

/// Remote list provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Cloudflare account-level lists
    Cloudflare {
        /// API token; normally injected from the environment
        #[serde(default, skip_serializing)]
        api_token: String,
        /// API base URL override
        #[serde(default)]
        base_url: Option<String>,
    },

    /// Custom provider
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ProviderConfig {
    /// Validate the provider configuration
    ///
    /// An empty Cloudflare token is accepted here because the token is
    /// injected from the environment after the file is loaded.
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Cloudflare { base_url, .. } => {
                if let Some(url) = base_url
                    && !is_http_url(url)
                {
                    return Err(crate::Error::config(format!(
                        "Provider base_url must be an http(s) URL. Got: {url}"
                    )));
                }
                Ok(())
            }
            ProviderConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom provider factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom provider config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Cloudflare { .. } => "cloudflare",
            ProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Cloudflare {
            api_token: String::new(),
            base_url: None,
        }
    }
}

// Tokens must never reach logs
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderConfig::Cloudflare { base_url, .. } => f
                .debug_struct("Cloudflare")
                .field("api_token", &"<REDACTED>")
                .field("base_url", base_url)
                .finish(),
            ProviderConfig::Custom { factory, .. } => f
                .debug_struct("Custom")
                .field("factory", factory)
                .field("config", &"<REDACTED>")
                .finish(),
        }
    }
}

/// Cache store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheStoreConfig {
    /// File-based cache
    File {
        /// Path to the cache file
        path: String,
    },

    /// In-memory cache (not persistent)
    #[default]
    Memory,

    /// Custom cache store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl CacheStoreConfig {
    /// Get the cache store type name
    pub fn type_name(&self) -> &str {
        match self {
            CacheStoreConfig::File { .. } => "file",
            CacheStoreConfig::Memory => "memory",
            CacheStoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pairs processed concurrently
    #[serde(default = "default_max_concurrent_pairs")]
    pub max_concurrent_pairs: usize,

    /// Retries after a throttled mutation (0 disables retrying)
    #[serde(default = "default_max_mutation_retries")]
    pub max_mutation_retries: u32,

    /// Lower bound of the random backoff used when no retry-after is given
    #[serde(default = "default_backoff_min_secs")]
    pub backoff_min_secs: u64,

    /// Upper bound of the random backoff used when no retry-after is given
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Ceiling applied to server-provided retry-after hints
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,

    /// Requests allowed per account per budget window
    #[serde(default = "default_request_budget")]
    pub request_budget: u32,

    /// Budget window length (in seconds)
    #[serde(default = "default_budget_window_secs")]
    pub budget_window_secs: u64,

    /// Upper bound on pages read from one remote list
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Cache records older than this are ignored, forcing a remote re-read
    #[serde(default)]
    pub cache_max_age_secs: Option<u64>,

    /// Compute and log mutations without applying them
    #[serde(default)]
    pub dry_run: bool,

    /// Capacity of the internal event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_concurrent_pairs == 0 {
            return Err(crate::Error::config("max_concurrent_pairs must be > 0"));
        }
        if self.backoff_min_secs > self.backoff_max_secs {
            return Err(crate::Error::config(format!(
                "backoff_min_secs ({}) exceeds backoff_max_secs ({})",
                self.backoff_min_secs, self.backoff_max_secs
            )));
        }
        if self.max_retry_after_secs == 0 {
            return Err(crate::Error::config("max_retry_after_secs must be > 0"));
        }
        if self.request_budget == 0 {
            return Err(crate::Error::config("request_budget must be > 0"));
        }
        if self.budget_window_secs == 0 {
            return Err(crate::Error::config("budget_window_secs must be > 0"));
        }
        if self.max_pages == 0 {
            return Err(crate::Error::config("max_pages must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }

    /// Budget window as a duration
    pub fn budget_window(&self) -> Duration {
        Duration::from_secs(self.budget_window_secs)
    }

    /// Longest wait honoured from a retry-after hint
    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }

    /// Maximum cache age, if configured
    pub fn cache_max_age(&self) -> Option<chrono::Duration> {
        self.cache_max_age_secs
            .and_then(|secs| chrono::Duration::try_seconds(i64::try_from(secs).ok()?))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pairs: default_max_concurrent_pairs(),
            max_mutation_retries: default_max_mutation_retries(),
            backoff_min_secs: default_backoff_min_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            max_retry_after_secs: default_max_retry_after_secs(),
            request_budget: default_request_budget(),
            budget_window_secs: default_budget_window_secs(),
            max_pages: default_max_pages(),
            cache_max_age_secs: None,
            dry_run: false,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

fn default_enabled() -> bool {
    true
}

fn default_field() -> String {
    "ip".to_string()
}

fn default_max_concurrent_pairs() -> usize {
    4
}

fn default_max_mutation_retries() -> u32 {
    1
}

fn default_backoff_min_secs() -> u64 {
    300
}

fn default_backoff_max_secs() -> u64 {
    600
}

fn default_max_retry_after_secs() -> u64 {
    3600
}

fn default_request_budget() -> u32 {
    1200
}

fn default_budget_window_secs() -> u64 {
    300
}

fn default_max_pages() -> usize {
    1000
}

fn default_event_channel_capacity() -> usize {
    1000
}
