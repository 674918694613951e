// # HTTP Feed Source
//
// `SourceFetcher` implementation for remote and local feeds.
//
// ## Supported Schemes
//
// - `http://`, `https://`: one GET per fetch, non-2xx is a failure
// - `file://`: the path is read from the local filesystem
//
// Parsing is delegated to `iplist_core::feed`; this crate only owns the I/O.
// There is no caching and no retrying here: a failed source fails its pair
// and the next run tries again.

use async_trait::async_trait;
use iplist_core::config::SourceDescriptor;
use iplist_core::feed::{self, FetchedMembership};
use iplist_core::traits::SourceFetcher;
use iplist_core::{Error, Result};
use std::time::Duration;

/// Default timeout for a single feed download
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const FILE_SCHEME: &str = "file://";

/// Fetches feeds over HTTP(S) or from local files
#[derive(Debug, Clone)]
pub struct HttpSourceFetcher {
    client: reqwest::Client,
}

impl HttpSourceFetcher {
    /// Create a fetcher with the default timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    /// Create a fetcher with a custom per-request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("iplistd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn download(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch(format!("{url}: request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(format!("{url}: HTTP error {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| Error::fetch(format!("{url}: failed to read response: {e}")))
    }

    async fn read_file(&self, url: &str) -> Result<String> {
        let path = &url[FILE_SCHEME.len()..];
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::fetch(format!("{url}: {e}")))
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<FetchedMembership> {
        tracing::debug!("Fetching feed {}", source.url);

        let body = if source.url.starts_with(FILE_SCHEME) {
            self.read_file(&source.url).await?
        } else if source.url.starts_with("http://") || source.url.starts_with("https://") {
            self.download(&source.url).await?
        } else {
            return Err(Error::fetch(format!(
                "{}: unsupported URL scheme",
                source.url
            )));
        };

        let fetched = feed::parse_source(source, &body)?;
        tracing::debug!(
            "Feed {} yielded {} entries",
            source.url,
            fetched.membership.len()
        );
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iplist_core::FeedFormat;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpSourceFetcher {
        HttpSourceFetcher::new().unwrap()
    }

    #[tokio::test]
    async fn test_fetch_text_feed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/block.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("# blocklist\n1.2.3.4\n5.6.7.0/24 # scanner\nnot-an-ip\n"),
            )
            .mount(&mock_server)
            .await;

        let source = SourceDescriptor::new(
            format!("{}/block.txt", mock_server.uri()),
            FeedFormat::Text,
        );
        let fetched = fetcher().fetch(&source).await.unwrap();

        assert_eq!(
            fetched.membership.to_strings(),
            vec!["1.2.3.4", "5.6.7.0/24"]
        );
        assert_eq!(fetched.rejected, 1);
    }

    #[tokio::test]
    async fn test_fetch_json_feed_with_field() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "address": "2001:db8::1" },
                    { "address": "10.0.0.0/8" }
                ]
            })))
            .mount(&mock_server)
            .await;

        let source = SourceDescriptor::new(
            format!("{}/feed.json", mock_server.uri()),
            FeedFormat::Json,
        )
        .with_field("address");
        let fetched = fetcher().fetch(&source).await.unwrap();

        assert_eq!(fetched.membership.len(), 2);
        assert_eq!(fetched.rejected, 0);
    }

    #[tokio::test]
    async fn test_http_error_is_fetch_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let source = SourceDescriptor::new(
            format!("{}/down.txt", mock_server.uri()),
            FeedFormat::Text,
        );
        match fetcher().fetch(&source).await.unwrap_err() {
            Error::Fetch(msg) => assert!(msg.contains("503"), "{msg}"),
            err => panic!("Expected Fetch error, got {:?}", err),
        }
    }

    #[tokio::test]
    async fn test_empty_feed_needs_allow_empty() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("# nothing today\n"))
            .mount(&mock_server)
            .await;

        let url = format!("{}/empty.txt", mock_server.uri());
        let strict = SourceDescriptor::new(url.clone(), FeedFormat::Text);
        assert!(matches!(
            fetcher().fetch(&strict).await,
            Err(Error::Fetch(_))
        ));

        let lenient = SourceDescriptor::new(url, FeedFormat::Text).with_allow_empty(true);
        let fetched = fetcher().fetch(&lenient).await.unwrap();
        assert!(fetched.membership.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_local_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "192.0.2.1").unwrap();
        writeln!(file, "; legacy entries").unwrap();
        writeln!(file, "198.51.100.0/24").unwrap();

        let source = SourceDescriptor::new(
            format!("file://{}", file.path().display()),
            FeedFormat::Text,
        );
        let fetched = fetcher().fetch(&source).await.unwrap();

        assert_eq!(
            fetched.membership.to_strings(),
            vec!["192.0.2.1", "198.51.100.0/24"]
        );
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = SourceDescriptor::new(
            format!("file://{}", dir.path().join("missing.txt").display()),
            FeedFormat::Text,
        );
        assert!(matches!(
            fetcher().fetch(&source).await,
            Err(Error::Fetch(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let source = SourceDescriptor::new("ftp://feeds.example.com/x.txt", FeedFormat::Text);
        assert!(matches!(
            fetcher().fetch(&source).await,
            Err(Error::Fetch(_))
        ));
    }
}
