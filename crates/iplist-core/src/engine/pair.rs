//! Per-pair state machine
//!
//! ```text
//! Fetching → CacheCheck ─┬─ match ──────────────────────────────→ Skipped
//!                        └─ miss → Reading → Diffing ─┬─ empty ──→ Persisting → Updated{0,0}
//!                                                     └─ delta ──→ Mutating → Persisting → Updated
//! ```
//!
//! Any stage may end in `Failed(stage, reason)`; the failure never leaves the pair.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::EngineEvent;
use crate::budget::BudgetRegistry;
use crate::config::ListConfig;
use crate::diff::diff;
use crate::error::Error;
use crate::feed::FetchedMembership;
use crate::mutation::MutationClient;
use crate::reader::ListReader;
use crate::report::{PairReport, SyncOutcome};
use crate::traits::{CacheStore, SourceFetcher};

/// Step of the per-pair state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStage {
    /// Fetching every source of the list
    Fetching,
    /// Comparing the source fingerprint with the cache
    CacheCheck,
    /// Reading the remote list
    Reading,
    /// Computing the delta
    Diffing,
    /// Issuing the bulk mutation
    Mutating,
    /// Recording the new fingerprint
    Persisting,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Fetching => "fetching",
            SyncStage::CacheCheck => "cache check",
            SyncStage::Reading => "reading",
            SyncStage::Diffing => "diffing",
            SyncStage::Mutating => "mutating",
            SyncStage::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

/// Failure of one pair at a given stage
#[derive(Debug)]
pub struct PairFailure {
    /// Stage that failed
    pub stage: SyncStage,
    /// Underlying error
    pub error: Error,
}

impl fmt::Display for PairFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.error)
    }
}

/// One (account, list) pair scheduled for a run
#[derive(Debug, Clone)]
pub(crate) struct PairJob {
    pub account_id: String,
    /// Account id as shown in logs and reports
    pub display_id: String,
    pub account_label: String,
    pub list: ListConfig,
}

impl PairJob {
    pub(crate) fn report(&self, outcome: SyncOutcome, rejected: usize, elapsed_ms: u64) -> PairReport {
        PairReport {
            account_id: self.display_id.clone(),
            account_label: self.account_label.clone(),
            list: self.list.name.clone(),
            outcome,
            rejected_entries: rejected,
            elapsed_ms,
        }
    }
}

/// Everything a pair task needs, shared by all pairs of one run
pub(crate) struct PairWorker {
    pub fetcher: Arc<dyn SourceFetcher>,
    pub cache: Arc<dyn CacheStore>,
    pub reader: ListReader,
    pub mutator: MutationClient,
    pub budgets: BudgetRegistry,
    pub cache_max_age: Option<chrono::Duration>,
    pub dry_run: bool,
    pub event_tx: mpsc::Sender<EngineEvent>,
}

impl PairWorker {
    /// Run one pair to completion
    pub(crate) async fn run(&self, job: &PairJob) -> PairReport {
        let started = Instant::now();
        let mut rejected = 0;

        let outcome = match self.sync(job, &mut rejected).await {
            Ok(outcome) => {
                match &outcome {
                    SyncOutcome::Skipped => {
                        info!("{} / {}: sources unchanged, skipping", job.display_id, job.list.name);
                        self.emit(EngineEvent::PairSkipped {
                            account_id: job.display_id.clone(),
                            list: job.list.name.clone(),
                        });
                    }
                    SyncOutcome::Updated { added, removed } => {
                        info!(
                            "{} / {}: synchronized (+{} -{})",
                            job.display_id, job.list.name, added, removed
                        );
                        self.emit(EngineEvent::PairUpdated {
                            account_id: job.display_id.clone(),
                            list: job.list.name.clone(),
                            added: *added,
                            removed: *removed,
                        });
                    }
                    SyncOutcome::Failed { .. } => {}
                }
                outcome
            }
            Err(failure) => {
                error!("{} / {}: {}", job.display_id, job.list.name, failure);
                self.emit(EngineEvent::PairFailed {
                    account_id: job.display_id.clone(),
                    list: job.list.name.clone(),
                    stage: failure.stage,
                    error: failure.error.to_string(),
                });
                SyncOutcome::Failed {
                    reason: failure.to_string(),
                }
            }
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        job.report(outcome, rejected, elapsed_ms)
    }

    async fn sync(&self, job: &PairJob, rejected: &mut usize) -> Result<SyncOutcome, PairFailure> {
        let account_id = job.account_id.as_str();
        let list_name = job.list.name.as_str();

        self.enter(job, SyncStage::Fetching);
        let mut desired = FetchedMembership::default();
        for source in &job.list.sources {
            let fetched = self
                .fetcher
                .fetch(source)
                .await
                .map_err(|error| fail(SyncStage::Fetching, error))?;
            desired.merge(fetched);
        }
        *rejected = desired.rejected;
        let desired = desired.membership;
        debug!(
            "{} / {}: {} desired entries from {} source(s)",
            job.display_id,
            list_name,
            desired.len(),
            job.list.sources.len()
        );

        self.enter(job, SyncStage::CacheCheck);
        let fingerprint = desired.fingerprint();
        if self
            .cache
            .should_skip_within(account_id, list_name, &fingerprint, self.cache_max_age)
            .await
        {
            return Ok(SyncOutcome::Skipped);
        }

        self.enter(job, SyncStage::Reading);
        let budget = self.budgets.budget_for(account_id);
        let remote = self
            .reader
            .read(&budget, account_id, list_name)
            .await
            .map_err(|error| fail(SyncStage::Reading, error))?;

        self.enter(job, SyncStage::Diffing);
        let delta = diff(&remote.membership, &desired);

        let (added, removed) = if delta.is_empty() {
            debug!("{} / {}: remote already matches sources", job.display_id, list_name);
            (0, 0)
        } else {
            self.enter(job, SyncStage::Mutating);
            let result = self
                .mutator
                .apply(&budget, account_id, &remote.handle, &delta, &desired)
                .await
                .map_err(|error| fail(SyncStage::Mutating, Error::Mutation(error)))?;
            (result.added, result.removed)
        };

        if self.dry_run {
            return Ok(SyncOutcome::Updated { added, removed });
        }

        self.enter(job, SyncStage::Persisting);
        if let Err(e) = self
            .cache
            .put(account_id, list_name, &fingerprint, desired.len())
            .await
        {
            // The remote list is already correct; the next run re-reads it
            warn!(
                "{} / {}: failed to record fingerprint: {}",
                job.display_id, list_name, e
            );
        }

        Ok(SyncOutcome::Updated { added, removed })
    }

    fn enter(&self, job: &PairJob, stage: SyncStage) {
        debug!("{} / {}: {}", job.display_id, job.list.name, stage);
        self.emit(EngineEvent::StageEntered {
            account_id: job.display_id.clone(),
            list: job.list.name.clone(),
            stage,
        });
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        super::emit_event(&self.event_tx, event);
    }
}

fn fail(stage: SyncStage, error: Error) -> PairFailure {
    PairFailure { stage, error }
}
