//! Run reports, report sinks and notifiers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Final state of one (account, list) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Source membership unchanged since the last successful sync
    Skipped,
    /// Remote list brought in line with the sources
    Updated {
        /// Entries added
        added: usize,
        /// Entries removed
        removed: usize,
    },
    /// The pair could not be synchronized
    Failed {
        /// Stage and error
        reason: String,
    },
}

impl SyncOutcome {
    /// Whether this outcome is a failure
    pub fn is_failed(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }
}

/// Outcome of one pair plus context for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairReport {
    /// Account id (masked when anonymization is on)
    pub account_id: String,
    /// Account display label (masked when anonymization is on)
    pub account_label: String,
    /// List name
    pub list: String,
    /// Outcome
    pub outcome: SyncOutcome,
    /// Source elements dropped during canonicalization
    pub rejected_entries: usize,
    /// Wall time spent on the pair
    pub elapsed_ms: u64,
}

/// Summary of one run over all configured pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// Pair reports in configuration order
    pub pairs: Vec<PairReport>,
    /// Whether shutdown was requested during the run
    pub cancelled: bool,
    /// Pairs never started because of shutdown
    pub not_started: usize,
}

impl RunReport {
    /// Pairs skipped
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Skipped))
    }

    /// Pairs updated
    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Updated { .. }))
    }

    /// Pairs failed
    pub fn failed(&self) -> usize {
        self.count(SyncOutcome::is_failed)
    }

    /// True when at least one pair ran and every one of them failed
    pub fn all_failed(&self) -> bool {
        !self.pairs.is_empty() && self.failed() == self.pairs.len()
    }

    fn count(&self, pred: impl Fn(&SyncOutcome) -> bool) -> usize {
        self.pairs.iter().filter(|p| pred(&p.outcome)).count()
    }
}

/// Destination for the run report
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Emit a finished run report
    async fn emit(&self, report: &RunReport) -> Result<(), crate::Error>;
}

/// Per-pair webhook notification
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notify `webhook` about one pair's outcome
    async fn notify(&self, webhook: &str, report: &PairReport) -> Result<(), crate::Error>;
}

/// [`ReportSink`] that writes a summary through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReportSink;

#[async_trait]
impl ReportSink for LogReportSink {
    async fn emit(&self, report: &RunReport) -> Result<(), crate::Error> {
        for pair in &report.pairs {
            match &pair.outcome {
                SyncOutcome::Skipped => tracing::info!(
                    "{} / {}: unchanged, skipped",
                    pair.account_label,
                    pair.list
                ),
                SyncOutcome::Updated { added, removed } => tracing::info!(
                    "{} / {}: updated (+{} -{})",
                    pair.account_label,
                    pair.list,
                    added,
                    removed
                ),
                SyncOutcome::Failed { reason } => tracing::error!(
                    "{} / {}: failed: {}",
                    pair.account_label,
                    pair.list,
                    reason
                ),
            }
        }

        tracing::info!(
            "Run finished: {} updated, {} skipped, {} failed{}",
            report.updated(),
            report.skipped(),
            report.failed(),
            if report.cancelled {
                format!(" ({} not started, shutdown requested)", report.not_started)
            } else {
                String::new()
            }
        );
        Ok(())
    }
}

/// Mask an account id as `abcdef...wxyz`
///
/// Ids shorter than 10 characters are returned unchanged.
pub fn mask_account_id(account_id: &str) -> String {
    let chars: Vec<char> = account_id.chars().collect();
    if chars.len() < 10 {
        return account_id.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Mask an email address as `j**n@e******.com`
///
/// Values without `@` are returned unchanged.
pub fn mask_email(value: &str) -> String {
    let Some((name, domain)) = value.split_once('@') else {
        return value.to_string();
    };

    let name_chars: Vec<char> = name.chars().collect();
    let masked_name = if name_chars.len() > 2 {
        format!(
            "{}{}{}",
            name_chars[0],
            "*".repeat(name_chars.len() - 2),
            name_chars[name_chars.len() - 1]
        )
    } else {
        format!("{name}*")
    };

    let masked_domain = match domain.split_once('.') {
        Some((first, rest)) if !first.is_empty() => {
            let mut chars = first.chars();
            let lead = chars.next().map(String::from).unwrap_or_default();
            format!("{}{}.{}", lead, "*".repeat(chars.count()), rest)
        }
        _ => domain.to_string(),
    };

    format!("{masked_name}@{masked_domain}")
}
