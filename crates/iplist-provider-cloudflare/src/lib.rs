// # Cloudflare Lists Provider
//
// `ListProvider` implementation for Cloudflare account-level rules lists
// (API v4).
//
// The provider issues exactly one HTTP request per trait call. Pagination,
// request budgeting, backoff and retries are owned by the engine; this crate
// only translates between the engine's types and the API.
//
// ## Security
//
// - The API token never appears in logs or in `Debug` output
// - An empty token is a configuration error, never a panic
//
// ## API Reference
//
// - List lists: GET `/accounts/:account_id/rules/lists`
// - List items: GET `/accounts/:account_id/rules/lists/:list_id/items?per_page=500&cursor=...`
// - Replace items: PUT `/accounts/:account_id/rules/lists/:list_id/items`

use async_trait::async_trait;
use iplist_core::config::ProviderConfig;
use iplist_core::traits::{
    BulkMutation, ListHandle, ListPage, ListProvider, ListProviderFactory,
};
use iplist_core::{Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Cloudflare API base URL
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// HTTP timeout for API requests
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Items requested per page when reading a list
const ITEMS_PER_PAGE: u32 = 500;

const PROVIDER: &str = "cloudflare";

/// Longest `Retry-After` accepted from the API
const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Standard v4 response envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    cursors: Option<Cursors>,
}

#[derive(Debug, Default, Deserialize)]
struct Cursors {
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListSummary {
    id: String,
    name: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    num_items: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    #[serde(default)]
    ip: Option<String>,
}

/// Cloudflare Lists API client
pub struct CloudflareListProvider {
    /// API token; never log this value
    api_token: String,

    /// API root, without trailing slash
    base_url: String,

    client: reqwest::Client,
}

// Keep the token out of debug output
impl std::fmt::Debug for CloudflareListProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareListProvider")
            .field("api_token", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl CloudflareListProvider {
    /// Create a provider talking to the public Cloudflare API
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the token is empty
    /// - `Error::Http` if the HTTP client cannot be built
    pub fn new(api_token: impl Into<String>) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.trim().is_empty() {
            return Err(Error::config("Cloudflare API token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_token,
            base_url: CLOUDFLARE_API_BASE.to_string(),
            client,
        })
    }

    /// Point the provider at another API root (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The API root in use
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn lists_url(&self, account_id: &str) -> String {
        format!("{}/accounts/{}/rules/lists", self.base_url, account_id)
    }

    fn items_url(&self, account_id: &str, list_id: &str) -> String {
        format!("{}/items", self.list_url(account_id, list_id))
    }

    fn list_url(&self, account_id: &str, list_id: &str) -> String {
        format!("{}/{}", self.lists_url(account_id), list_id)
    }

    /// Send a request and decode the envelope, mapping failures to crate errors
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<Envelope<T>> {
        let response = request
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::http(format!("{what}: request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status.as_u16(), retry_after, what, &body));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("{what}: failed to parse response: {e}")))?;

        if !envelope.success {
            return Err(Error::rejected(format!(
                "{what}: {}",
                describe_errors(&envelope.errors)
            )));
        }
        Ok(envelope)
    }
}

/// Map a non-2xx status to the crate error taxonomy
fn status_error(status: u16, retry_after: Option<Duration>, what: &str, body: &str) -> Error {
    match status {
        429 => Error::rate_limited(retry_after),
        401 | 403 => Error::auth(format!(
            "{what}: invalid API token or insufficient permissions (status {status})"
        )),
        404 => Error::not_found(format!("{what}: status {status}")),
        400..=499 => Error::rejected(format!("{what}: status {status}: {}", error_summary(body))),
        _ => Error::http(format!(
            "{what}: Cloudflare server error (status {status}): {}",
            error_summary(body)
        )),
    }
}

/// Parse a `Retry-After` header given in seconds, capped at [`MAX_RETRY_AFTER`]
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// Prefer the API's own error messages over the raw body
fn error_summary(body: &str) -> String {
    match serde_json::from_str::<Envelope<serde_json::Value>>(body) {
        Ok(envelope) if !envelope.errors.is_empty() => describe_errors(&envelope.errors),
        _ => body.chars().take(200).collect(),
    }
}

fn describe_errors(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "request unsuccessful".to_string();
    }
    errors
        .iter()
        .map(|e| match e.code {
            Some(code) => format!("{} ({})", e.message, code),
            None => e.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
impl ListProvider for CloudflareListProvider {
    async fn resolve_list(&self, account_id: &str, list_name: &str) -> Result<ListHandle> {
        tracing::debug!("Resolving list '{}'", list_name);

        let envelope: Envelope<Vec<ListSummary>> = self
            .send(self.client.get(self.lists_url(account_id)), "list lookup")
            .await?;

        let summary = envelope
            .result
            .unwrap_or_default()
            .into_iter()
            .find(|l| l.name == list_name)
            .ok_or_else(|| Error::not_found(format!("List '{list_name}' not found in account")))?;

        tracing::debug!("Found list '{}' with id {}", summary.name, summary.id);
        Ok(ListHandle {
            id: summary.id,
            name: summary.name,
            kind: summary.kind,
            num_items: summary.num_items,
        })
    }

    async fn read_page(
        &self,
        account_id: &str,
        list: &ListHandle,
        cursor: Option<&str>,
    ) -> Result<ListPage> {
        let mut request = self
            .client
            .get(self.items_url(account_id, &list.id))
            .query(&[("per_page", ITEMS_PER_PAGE.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let envelope: Envelope<Vec<ListItem>> = self.send(request, "list read").await?;

        let mut entries = Vec::new();
        for item in envelope.result.unwrap_or_default() {
            match item.ip {
                Some(ip) => entries.push(ip),
                // Non-IP items (ASN, hostname lists) cannot be represented
                None => {
                    return Err(Error::provider(
                        PROVIDER,
                        format!("List '{}' contains a non-IP item", list.name),
                    ));
                }
            }
        }

        let next_cursor = envelope
            .result_info
            .and_then(|info| info.cursors)
            .and_then(|c| c.after)
            .filter(|c| !c.is_empty());

        Ok(ListPage {
            entries,
            next_cursor,
        })
    }

    /// Replace the list's items with `mutation.target` in one atomic call
    async fn bulk_mutate(
        &self,
        account_id: &str,
        list: &ListHandle,
        mutation: &BulkMutation,
    ) -> Result<()> {
        tracing::info!(
            "Replacing list '{}': +{} -{} ({} items)",
            list.name,
            mutation.add.len(),
            mutation.remove.len(),
            mutation.target.len()
        );

        let payload: Vec<serde_json::Value> = mutation
            .target
            .iter()
            .map(|entry| serde_json::json!({ "ip": entry.to_string() }))
            .collect();

        let _: Envelope<serde_json::Value> = self
            .send(
                self.client
                    .put(self.items_url(account_id, &list.id))
                    .json(&payload),
                "list replace",
            )
            .await?;

        tracing::info!("List '{}' replaced", list.name);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Factory for creating Cloudflare list providers
pub struct CloudflareFactory;

impl ListProviderFactory for CloudflareFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn ListProvider>> {
        match config {
            ProviderConfig::Cloudflare {
                api_token,
                base_url,
            } => {
                if api_token.is_empty() {
                    return Err(Error::config("Cloudflare API token is required"));
                }

                let mut provider = CloudflareListProvider::new(api_token.clone())?;
                if let Some(base_url) = base_url {
                    provider = provider.with_base_url(base_url.clone());
                }
                Ok(Box::new(provider))
            }
            _ => Err(Error::config("Invalid config for Cloudflare provider")),
        }
    }
}

/// Register the Cloudflare provider with a registry
///
/// # Example
///
/// ```rust
/// use iplist_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// iplist_provider_cloudflare::register(&registry);
/// assert!(registry.has_provider("cloudflare"));
/// ```
pub fn register(registry: &iplist_core::ProviderRegistry) {
    registry.register_provider(PROVIDER, Box::new(CloudflareFactory));
}
