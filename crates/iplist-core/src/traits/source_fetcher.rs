// # Source Fetcher Trait
//
// Retrieves the body of one feed and turns it into canonical entries.
// Implementations own the I/O and delegate parsing to `crate::feed`.

use async_trait::async_trait;

use crate::config::SourceDescriptor;
use crate::feed::FetchedMembership;

/// Trait for feed fetcher implementations
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch and parse one feed
    ///
    /// # Returns
    ///
    /// - `Ok(FetchedMembership)`: canonical entries plus the count of rejected elements
    /// - `Err(Error::Fetch)`: transport failure, unparseable document, or an
    ///   empty feed without `allow_empty`
    async fn fetch(&self, source: &SourceDescriptor) -> Result<FetchedMembership, crate::Error>;
}
