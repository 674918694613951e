// # List Provider Trait
//
// Defines the interface to the remote list API: looking a list up by name,
// reading it page by page, and replacing its contents with one bulk call.
//
// ## Implementations
//
// - Cloudflare account lists: `iplist-provider-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use iplist_core::ListProvider;
//
// let handle = provider.resolve_list("account-id", "blocklist").await?;
// let page = provider.read_page("account-id", &handle, None).await?;
// ```

use async_trait::async_trait;

use crate::entry::Entry;

/// Provider-side identity of a named list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListHandle {
    /// Provider list id
    pub id: String,
    /// List name as configured
    pub name: String,
    /// List kind reported by the provider (e.g. "ip")
    pub kind: Option<String>,
    /// Item count reported by the provider
    pub num_items: Option<u64>,
}

impl ListHandle {
    /// Create a handle with only id and name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: None,
            num_items: None,
        }
    }
}

/// One page of a remote list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Raw entries as returned by the provider
    pub entries: Vec<String>,
    /// Cursor of the next page, `None` on the last page
    pub next_cursor: Option<String>,
}

/// A single bulk change to one list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkMutation {
    /// Entries to add
    pub add: Vec<Entry>,
    /// Entries to remove
    pub remove: Vec<Entry>,
    /// Complete membership after the change
    ///
    /// Providers whose bulk endpoint replaces the whole list send this
    /// instead of `add`/`remove`.
    pub target: Vec<Entry>,
}

/// Trait for remote list provider implementations
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Errors
///
/// Implementations translate API failures into the crate error type:
///
/// - throttling → [`Error::RateLimited`](crate::Error::RateLimited), with the server's retry-after when sent
/// - bad credentials → [`Error::Authentication`](crate::Error::Authentication)
/// - unknown list or account → [`Error::NotFound`](crate::Error::NotFound)
/// - other client errors → [`Error::Rejected`](crate::Error::Rejected)
/// - network and 5xx → [`Error::Http`](crate::Error::Http)
///
/// Providers issue one request per call. Retrying, backoff and request
/// budgeting belong to the caller.
#[async_trait]
pub trait ListProvider: Send + Sync {
    /// Look a list up by name within an account
    async fn resolve_list(
        &self,
        account_id: &str,
        list_name: &str,
    ) -> Result<ListHandle, crate::Error>;

    /// Read one page of a list
    ///
    /// # Parameters
    ///
    /// - `cursor`: `None` for the first page, otherwise the previous page's `next_cursor`
    async fn read_page(
        &self,
        account_id: &str,
        list: &ListHandle,
        cursor: Option<&str>,
    ) -> Result<ListPage, crate::Error>;

    /// Apply one bulk mutation to a list
    async fn bulk_mutate(
        &self,
        account_id: &str,
        list: &ListHandle,
        mutation: &BulkMutation,
    ) -> Result<(), crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing list providers from configuration
pub trait ListProviderFactory: Send + Sync {
    /// Create a ListProvider instance from configuration
    fn create(
        &self,
        config: &crate::config::ProviderConfig,
    ) -> Result<Box<dyn ListProvider>, crate::Error>;
}
