//! Per-account request budgets
//!
//! Every remote call for an account (list lookup, page read, bulk mutation)
//! first acquires a permit from that account's [`AccountBudget`]. The budget
//! combines a `governor` token bucket (N requests per window) with a backoff
//! gate: when any pair of the account is throttled, the gate holds back every
//! other pair of the same account until the throttle expires.
//!
//! Budgets are created per run by a [`BudgetRegistry`]; nothing is shared
//! across accounts. Both the token bucket and the gate read time from the
//! run's [`Timer`], so a simulated clock drives refills as well as backoff.

use governor::clock::Clock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::timer::Timer;

/// `governor` clock reading from a [`Timer`]
#[derive(Clone)]
pub struct TimerClock(Arc<dyn Timer>);

impl Clock for TimerClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        self.0.now()
    }
}

type TimerRateLimiter = RateLimiter<NotKeyed, InMemoryState, TimerClock, NoOpMiddleware<Instant>>;

/// Request allowance and backoff gate for one account
pub struct AccountBudget {
    account_id: String,
    limiter: TimerRateLimiter,
    clock: TimerClock,
    blocked_until: Mutex<Option<Instant>>,
}

impl AccountBudget {
    /// Create a budget with the given quota, measured on `timer`
    pub fn new(account_id: impl Into<String>, quota: Quota, timer: Arc<dyn Timer>) -> Self {
        let clock = TimerClock(timer);
        Self {
            account_id: account_id.into(),
            limiter: RateLimiter::direct_with_clock(quota, clock.clone()),
            clock,
            blocked_until: Mutex::new(None),
        }
    }

    /// Account this budget belongs to
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Hold back every request of this account until `deadline`
    ///
    /// An earlier deadline never shortens a pending one.
    pub fn defer_until(&self, deadline: Instant) {
        let mut guard = self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *guard {
            Some(current) if current >= deadline => {}
            _ => *guard = Some(deadline),
        }
    }

    /// Hold back every request of this account for `wait` from now
    ///
    /// Returns `false`, leaving the gate untouched, when the deadline cannot
    /// be represented.
    pub fn defer_for(&self, wait: Duration) -> bool {
        match self.clock.now().checked_add(wait) {
            Some(deadline) => {
                self.defer_until(deadline);
                true
            }
            None => false,
        }
    }

    /// Pending backoff deadline, if any
    pub fn blocked_until(&self) -> Option<Instant> {
        *self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until a request may be issued, then consume one permit
    pub async fn acquire(&self) {
        let timer = self.clock.0.as_ref();
        loop {
            if let Some(deadline) = self.blocked_until() {
                let now = timer.now();
                if deadline > now {
                    let wait = deadline - now;
                    tracing::debug!(
                        "Account {} is backing off for {:?}",
                        self.account_id,
                        wait
                    );
                    timer.sleep(wait).await;
                    // The deadline may have moved while we slept
                    continue;
                }
            }

            match self.limiter.check() {
                Ok(()) => return,
                Err(not_until) => {
                    let wait = not_until.wait_time_from(self.clock.now());
                    tracing::debug!(
                        "Request budget exhausted for account {}, waiting {:?}",
                        self.account_id,
                        wait
                    );
                    timer.sleep(wait).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for AccountBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountBudget")
            .field("account_id", &self.account_id)
            .field("blocked_until", &self.blocked_until())
            .finish()
    }
}

/// Quota of `request_budget` requests per `budget_window_secs`, full burst allowed
pub fn quota_from_settings(settings: &EngineConfig) -> Result<Quota> {
    let burst = NonZeroU32::new(settings.request_budget)
        .ok_or_else(|| Error::config("request_budget must be > 0"))?;
    Quota::with_period(settings.budget_window() / settings.request_budget)
        .map(|quota| quota.allow_burst(burst))
        .ok_or_else(|| Error::config("budget_window_secs too short for request_budget"))
}

/// Hands out one [`AccountBudget`] per account
pub struct BudgetRegistry {
    quota: Quota,
    timer: Arc<dyn Timer>,
    budgets: Mutex<HashMap<String, Arc<AccountBudget>>>,
}

impl BudgetRegistry {
    /// Create a registry where every account gets `quota`
    pub fn new(quota: Quota, timer: Arc<dyn Timer>) -> Self {
        Self {
            quota,
            timer,
            budgets: Mutex::new(HashMap::new()),
        }
    }

    /// Create a registry from engine settings
    pub fn from_settings(settings: &EngineConfig, timer: Arc<dyn Timer>) -> Result<Self> {
        Ok(Self::new(quota_from_settings(settings)?, timer))
    }

    /// Budget for `account_id`, created on first use
    pub fn budget_for(&self, account_id: &str) -> Arc<AccountBudget> {
        let mut budgets = self.budgets.lock().unwrap_or_else(PoisonError::into_inner);
        budgets
            .entry(account_id.to_string())
            .or_insert_with(|| {
                Arc::new(AccountBudget::new(account_id, self.quota, self.timer.clone()))
            })
            .clone()
    }
}

impl std::fmt::Debug for BudgetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetRegistry")
            .field("quota", &self.quota)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TokioTimer;

    fn timer() -> Arc<dyn Timer> {
        Arc::new(TokioTimer)
    }

    /// Clock that only moves when slept on
    struct SteppedTimer {
        base: Instant,
        offset: Mutex<Duration>,
        sleeps: Mutex<Vec<Duration>>,
    }

    impl SteppedTimer {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
                sleeps: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Timer for SteppedTimer {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
            *self.offset.lock().unwrap() += duration;
        }
    }

    #[test]
    fn test_budget_shared_per_account() {
        let registry = BudgetRegistry::from_settings(&EngineConfig::default(), timer()).unwrap();
        let a1 = registry.budget_for("a");
        let a2 = registry.budget_for("a");
        let b = registry.budget_for("b");

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));

        a1.defer_until(Instant::now() + Duration::from_secs(60));
        assert!(a2.blocked_until().is_some());
        assert!(b.blocked_until().is_none());
    }

    #[test]
    fn test_defer_never_shortens() {
        let budget = AccountBudget::new(
            "a",
            Quota::per_second(NonZeroU32::new(10).unwrap()),
            timer(),
        );
        let now = Instant::now();
        budget.defer_until(now + Duration::from_secs(60));
        budget.defer_until(now + Duration::from_secs(5));
        assert_eq!(budget.blocked_until(), Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_unrepresentable_deferral_is_refused() {
        let budget = AccountBudget::new(
            "a",
            Quota::per_second(NonZeroU32::new(10).unwrap()),
            timer(),
        );
        assert!(!budget.defer_for(Duration::MAX));
        assert!(budget.blocked_until().is_none());

        assert!(budget.defer_for(Duration::from_secs(30)));
        assert!(budget.blocked_until().is_some());
    }

    #[tokio::test]
    async fn test_exhausted_budget_refills_on_simulated_time() {
        let stepped = Arc::new(SteppedTimer::new());
        // Two requests per minute, no burst beyond that
        let quota = Quota::with_period(Duration::from_secs(30))
            .unwrap()
            .allow_burst(NonZeroU32::new(2).unwrap());
        let budget = AccountBudget::new("a", quota, stepped.clone());

        budget.acquire().await;
        budget.acquire().await;
        assert!(stepped.sleeps.lock().unwrap().is_empty());

        // Third request waits for one replenishment period of simulated time
        budget.acquire().await;
        let sleeps = stepped.sleeps.lock().unwrap().clone();
        assert_eq!(sleeps, vec![Duration::from_secs(30)]);
    }

    #[test]
    fn test_zero_budget_rejected() {
        let settings = EngineConfig {
            request_budget: 0,
            ..EngineConfig::default()
        };
        assert!(BudgetRegistry::from_settings(&settings, timer()).is_err());
    }
}
