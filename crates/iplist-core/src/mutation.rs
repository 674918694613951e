//! Rate-limited mutation client
//!
//! Issues the single bulk mutation for a pair. Throttling is handled by a
//! small explicit state machine:
//!
//! ```text
//! Ready(n) --ok--------------------------> done
//! Ready(n) --rate limited, n <= retries--> Throttled(n, wait) --sleep--> Ready(n + 1)
//! Ready(n) --rate limited, n >  retries--> MutationError::RateLimited
//! Ready(n) --any other error-------------> MutationError::{Rejected, Transport}
//! ```
//!
//! The wait is the server's retry-after when given (capped at
//! `max_retry_after_secs`), else a random interval within the configured
//! backoff window. It is registered on the account's budget so sibling pairs
//! of the same account wait too.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use crate::budget::AccountBudget;
use crate::config::EngineConfig;
use crate::diff::SyncDelta;
use crate::entry::ListMembership;
use crate::error::{Error, MutationError};
use crate::timer::Timer;
use crate::traits::{BulkMutation, ListHandle, ListProvider};

/// Retry bounds for throttled mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Retries after the first throttled attempt
    pub max_retries: u32,
    /// Lower bound of the fallback wait
    pub fallback_min: Duration,
    /// Upper bound of the fallback wait
    pub fallback_max: Duration,
    /// Ceiling on a server-provided retry-after
    pub max_wait: Duration,
}

impl BackoffPolicy {
    /// Build the policy from engine settings
    pub fn from_settings(settings: &EngineConfig) -> Self {
        Self {
            max_retries: settings.max_mutation_retries,
            fallback_min: Duration::from_secs(settings.backoff_min_secs),
            fallback_max: Duration::from_secs(settings.backoff_max_secs),
            max_wait: settings.max_retry_after(),
        }
    }

    /// Wait before the next attempt
    pub fn wait_for(&self, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after {
            return wait.min(self.max_wait);
        }
        if self.fallback_min >= self.fallback_max {
            return self.fallback_min;
        }
        rand::thread_rng().gen_range(self.fallback_min..=self.fallback_max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_settings(&EngineConfig::default())
    }
}

/// Outcome of a successful bulk mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationResult {
    /// Provider calls issued
    pub attempts: u32,
    /// Entries added
    pub added: usize,
    /// Entries removed
    pub removed: usize,
    /// Whether the call was skipped because of dry-run mode
    pub dry_run: bool,
}

enum RetryState {
    Ready { attempt: u32 },
    Throttled { attempt: u32, wait: Duration },
}

/// Applies bulk mutations with bounded backoff
pub struct MutationClient {
    provider: Arc<dyn ListProvider>,
    timer: Arc<dyn Timer>,
    policy: BackoffPolicy,
    dry_run: bool,
}

impl MutationClient {
    /// Create a mutation client
    pub fn new(provider: Arc<dyn ListProvider>, timer: Arc<dyn Timer>, policy: BackoffPolicy) -> Self {
        Self {
            provider,
            timer,
            policy,
            dry_run: false,
        }
    }

    /// Log mutations instead of sending them
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Apply `delta` to `list`, producing `desired`
    pub async fn apply(
        &self,
        budget: &AccountBudget,
        account_id: &str,
        list: &ListHandle,
        delta: &SyncDelta,
        desired: &ListMembership,
    ) -> Result<MutationResult, MutationError> {
        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would update list '{}': +{} -{} ({} entries total)",
                list.name,
                delta.additions.len(),
                delta.removals.len(),
                desired.len()
            );
            return Ok(MutationResult {
                attempts: 0,
                added: delta.additions.len(),
                removed: delta.removals.len(),
                dry_run: true,
            });
        }

        let mutation = BulkMutation {
            add: delta.additions.clone(),
            remove: delta.removals.clone(),
            target: desired.iter().copied().collect(),
        };

        let mut state = RetryState::Ready { attempt: 1 };
        loop {
            state = match state {
                RetryState::Ready { attempt } => {
                    budget.acquire().await;
                    match self.provider.bulk_mutate(account_id, list, &mutation).await {
                        Ok(()) => {
                            return Ok(MutationResult {
                                attempts: attempt,
                                added: mutation.add.len(),
                                removed: mutation.remove.len(),
                                dry_run: false,
                            });
                        }
                        Err(Error::RateLimited { retry_after }) => {
                            let wait = self.policy.wait_for(retry_after);
                            let deferred = budget.defer_for(wait);

                            if !deferred || attempt > self.policy.max_retries {
                                tracing::warn!(
                                    "List '{}' still rate limited after {} attempt(s), giving up",
                                    list.name,
                                    attempt
                                );
                                return Err(MutationError::RateLimited {
                                    attempts: attempt,
                                    retry_after,
                                });
                            }
                            RetryState::Throttled { attempt, wait }
                        }
                        Err(e) => return Err(MutationError::classify(e)),
                    }
                }
                RetryState::Throttled { attempt, wait } => {
                    tracing::warn!(
                        "Rate limited on list '{}' (attempt {}), retrying in {:?}",
                        list.name,
                        attempt,
                        wait
                    );
                    self.timer.sleep(wait).await;
                    RetryState::Ready {
                        attempt: attempt + 1,
                    }
                }
            };
        }
    }
}
