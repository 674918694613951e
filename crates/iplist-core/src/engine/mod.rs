//! Sync orchestrator
//!
//! The SyncEngine runs one batch over every enabled (account, list) pair:
//! - Fetching the desired membership from the list's sources
//! - Skipping pairs whose sources did not change since the last sync
//! - Reading the remote list and diffing it against the sources
//! - Applying the delta as a single rate-limited bulk mutation
//! - Persisting the new fingerprint after success
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │  SyncEngine  │── EngineEvent ──▶ monitoring
//!                      └──────────────┘
//!                             │ one task per pair (bounded)
//!     ┌──────────────┬────────┴──────┬──────────────┬──────────────┐
//!     ▼              ▼               ▼              ▼              ▼
//! ┌──────────┐ ┌────────────┐ ┌────────────┐ ┌──────────────┐ ┌──────────┐
//! │ Source   │ │ CacheStore │ │ ListReader │ │ Mutation     │ │ Report   │
//! │ Fetcher  │ │ (skip/put) │ │ (paginate) │ │ Client       │ │ Sink     │
//! └──────────┘ └────────────┘ └────────────┘ └──────────────┘ └──────────┘
//! ```
//!
//! ## Failure Isolation
//!
//! A failing pair becomes `SyncOutcome::Failed` in the report; the run
//! continues with the other pairs. Only configuration errors are fatal,
//! and those are caught by [`SyncEngine::new`].

mod pair;

pub use pair::{PairFailure, SyncStage};

use governor::Quota;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::budget::{BudgetRegistry, quota_from_settings};
use crate::config::{AccountConfig, EngineConfig, SyncConfig};
use crate::error::Result;
use crate::mutation::{BackoffPolicy, MutationClient};
use crate::reader::ListReader;
use crate::report::{
    LogReportSink, Notifier, PairReport, ReportSink, RunReport, SyncOutcome, mask_account_id,
    mask_email,
};
use crate::timer::{Timer, TokioTimer};
use crate::traits::{CacheStore, ListProvider, SourceFetcher};
use pair::{PairJob, PairWorker};

/// Events emitted by the SyncEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Run started
    RunStarted {
        pairs: usize,
    },

    /// A pair entered a stage
    StageEntered {
        account_id: String,
        list: String,
        stage: SyncStage,
    },

    /// Sources unchanged, pair skipped
    PairSkipped {
        account_id: String,
        list: String,
    },

    /// Remote list synchronized
    PairUpdated {
        account_id: String,
        list: String,
        added: usize,
        removed: usize,
    },

    /// Pair failed
    PairFailed {
        account_id: String,
        list: String,
        stage: SyncStage,
        error: String,
    },

    /// Run finished
    RunFinished {
        updated: usize,
        skipped: usize,
        failed: usize,
    },
}

/// Core sync engine
///
/// ## Lifecycle
///
/// 1. Create with [`SyncEngine::new()`] (validates the configuration)
/// 2. Optionally attach a timer, notifier and report sinks
/// 3. Call [`SyncEngine::run()`] once per batch
///
/// ## Load Resistance
///
/// - **Bounded concurrency**: at most `max_concurrent_pairs` pairs run at once
/// - **Request budget**: every remote call of an account draws on one shared budget
/// - **Bounded event channel**: events are dropped (logged) when the channel is full
pub struct SyncEngine {
    fetcher: Arc<dyn SourceFetcher>,
    provider: Arc<dyn ListProvider>,
    cache: Arc<dyn CacheStore>,
    timer: Arc<dyn Timer>,
    notifier: Option<Arc<dyn Notifier>>,
    sinks: Vec<Arc<dyn ReportSink>>,
    accounts: Vec<AccountConfig>,
    settings: EngineConfig,
    quota: Quota,
    anonymize: bool,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl SyncEngine {
    /// Create a new sync engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        provider: Arc<dyn ListProvider>,
        cache: Arc<dyn CacheStore>,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let quota = quota_from_settings(&config.engine)?;
        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let engine = Self {
            fetcher,
            provider,
            cache,
            timer: Arc::new(TokioTimer),
            notifier: None,
            sinks: vec![Arc::new(LogReportSink)],
            accounts: config.accounts,
            settings: config.engine,
            quota,
            anonymize: config.anonymize,
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Replace the clock used for all waits
    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    /// Notify list webhooks through `notifier`
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Add a report sink (the log sink is always present)
    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Run one batch over every enabled pair
    pub async fn run(&self) -> RunReport {
        // Sender kept alive so the receiver never observes a change
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        self.run_with_shutdown(shutdown_rx).await
    }

    /// Run one batch, stopping before the next pair once `shutdown` turns true
    ///
    /// Pairs already in flight run to completion.
    pub async fn run_with_shutdown(&self, shutdown: watch::Receiver<bool>) -> RunReport {
        let started_at = chrono::Utc::now();
        let jobs = self.jobs();

        info!("Starting sync run over {} pair(s)", jobs.len());
        self.emit_event(EngineEvent::RunStarted { pairs: jobs.len() });

        let worker = Arc::new(self.worker());
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_pairs));
        let mut tasks = JoinSet::new();
        let mut started = 0;

        for (idx, job) in jobs.iter().enumerate() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            if *shutdown.borrow() {
                info!("Shutdown requested, not starting remaining pairs");
                break;
            }

            let worker = worker.clone();
            let job = job.clone();
            tasks.spawn(async move {
                let _permit = permit;
                (idx, worker.run(&job).await)
            });
            started += 1;
        }

        let mut results: Vec<Option<PairReport>> = vec![None; started];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, report)) => results[idx] = Some(report),
                Err(e) => error!("Pair task failed to complete: {}", e),
            }
        }

        let pairs: Vec<PairReport> = results
            .into_iter()
            .zip(&jobs)
            .map(|(report, job)| {
                report.unwrap_or_else(|| {
                    job.report(
                        SyncOutcome::Failed {
                            reason: "pair task panicked".to_string(),
                        },
                        0,
                        0,
                    )
                })
            })
            .collect();

        if let Err(e) = self.cache.flush().await {
            warn!("Failed to flush cache store: {}", e);
        }

        let not_started = jobs.len() - started;
        let report = RunReport {
            started_at,
            finished_at: chrono::Utc::now(),
            pairs,
            cancelled: not_started > 0,
            not_started,
        };

        self.emit_event(EngineEvent::RunFinished {
            updated: report.updated(),
            skipped: report.skipped(),
            failed: report.failed(),
        });

        self.publish(&report, &jobs).await;
        report
    }

    async fn publish(&self, report: &RunReport, jobs: &[PairJob]) {
        for sink in &self.sinks {
            if let Err(e) = sink.emit(report).await {
                warn!("Failed to emit run report: {}", e);
            }
        }

        let Some(notifier) = &self.notifier else {
            return;
        };
        for (pair, job) in report.pairs.iter().zip(jobs) {
            if let Some(webhook) = &job.list.webhook
                && let Err(e) = notifier.notify(webhook, pair).await
            {
                warn!(
                    "Failed to notify webhook for {} / {}: {}",
                    pair.account_label, pair.list, e
                );
            }
        }
    }

    fn jobs(&self) -> Vec<PairJob> {
        let mut jobs = Vec::new();
        for account in &self.accounts {
            let (display_id, account_label) = if self.anonymize {
                let masked = mask_account_id(&account.id);
                let label = account
                    .name
                    .as_deref()
                    .map(mask_email)
                    .unwrap_or_else(|| masked.clone());
                (masked, label)
            } else {
                (account.id.clone(), account.label().to_string())
            };

            for list in account.lists.iter().filter(|l| l.enabled) {
                jobs.push(PairJob {
                    account_id: account.id.clone(),
                    display_id: display_id.clone(),
                    account_label: account_label.clone(),
                    list: list.clone(),
                });
            }
        }
        jobs
    }

    fn worker(&self) -> PairWorker {
        PairWorker {
            fetcher: self.fetcher.clone(),
            cache: self.cache.clone(),
            reader: ListReader::new(self.provider.clone(), self.settings.max_pages)
                .with_max_wait(self.settings.max_retry_after()),
            mutator: MutationClient::new(
                self.provider.clone(),
                self.timer.clone(),
                BackoffPolicy::from_settings(&self.settings),
            )
            .with_dry_run(self.settings.dry_run),
            budgets: BudgetRegistry::new(self.quota, self.timer.clone()),
            cache_max_age: self.settings.cache_max_age(),
            dry_run: self.settings.dry_run,
            event_tx: self.event_tx.clone(),
        }
    }

    fn emit_event(&self, event: EngineEvent) {
        emit_event(&self.event_tx, event);
    }
}

/// Send an event, logging a warning if the channel is full
fn emit_event(tx: &mpsc::Sender<EngineEvent>, event: EngineEvent) {
    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event) {
        warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
    }
}
