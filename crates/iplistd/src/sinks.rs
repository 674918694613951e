//! Report sinks and webhook notifier used by the daemon

use async_trait::async_trait;
use iplist_core::{Error, Notifier, PairReport, ReportSink, RunReport};
use std::path::PathBuf;
use std::time::Duration;

/// Timeout for a single webhook delivery
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Writes the run report as pretty JSON, replacing the file atomically
#[derive(Debug, Clone)]
pub struct JsonFileReportSink {
    path: PathBuf,
}

impl JsonFileReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReportSink for JsonFileReportSink {
    async fn emit(&self, report: &RunReport) -> Result<(), Error> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(report)?;
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        tokio::fs::write(&temp, &json).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        tracing::debug!("Run report written to {}", self.path.display());
        Ok(())
    }
}

/// POSTs each pair report as JSON to the list's webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, webhook: &str, report: &PairReport) -> Result<(), Error> {
        let response = self
            .client
            .post(webhook)
            .json(report)
            .send()
            .await
            .map_err(|e| Error::http(format!("Webhook delivery failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::http(format!("Webhook returned status {status}")));
        }
        Ok(())
    }
}
