//! Contract Test: Rate-Limited Mutations
//!
//! Throttling is handled by the mutation client, never by providers, with a
//! bounded number of retries and a wait that every pair of the throttled
//! account honours.
//!
//! Constraints verified:
//! - A retry-after hint is waited out in full before exactly one retry
//! - Without a hint, the wait falls inside the configured backoff window
//! - Retries are bounded; exhaustion surfaces as MutationError::RateLimited
//! - Non-throttling failures are never retried
//! - The backoff gate is per account
//! - Oversized retry-after hints are capped and never overflow the clock

mod common;

use common::*;
use iplist_core::{
    BackoffPolicy, Entry, ListHandle, ListMembership, MemoryCacheStore,
    MutationClient, MutationError, SyncOutcome, Timer, diff,
};
use std::sync::Arc;
use std::time::Duration;

const FEED: &str = "https://feeds.example.com/block.txt";

fn membership(entries: &[&str]) -> ListMembership {
    entries.iter().map(|e| Entry::parse(e).unwrap()).collect()
}

#[tokio::test]
async fn retry_after_is_waited_then_retried_once() {
    let fetcher = Arc::new(MockFetcher::new().with_feed(FEED, "1.2.3.4\n"));
    let provider = Arc::new(
        MockListProvider::new()
            .with_list("acct", "block", &["9.9.9.9"])
            .script_mutations(
                "block",
                vec![Scripted::RateLimited(Some(Duration::from_secs(45)))],
            ),
    );

    let (engine, _rx, timer) = build_engine(
        fetcher,
        provider.clone(),
        Arc::new(MemoryCacheStore::new()),
        config_for(&[("acct", "block", &[FEED])]),
    );
    let report = engine.run().await;

    assert_eq!(
        report.pairs[0].outcome,
        SyncOutcome::Updated {
            added: 1,
            removed: 1
        }
    );
    assert_eq!(provider.mutate_calls(), 2, "one call plus exactly one retry");
    assert!(timer.elapsed() >= Duration::from_secs(45));
    assert_eq!(timer.sleeps(), vec![Duration::from_secs(45)]);
}

#[tokio::test]
async fn exhausted_retries_fail_the_pair() {
    let fetcher = Arc::new(MockFetcher::new().with_feed(FEED, "1.2.3.4\n"));
    let provider = Arc::new(
        MockListProvider::new()
            .with_list("acct", "block", &["9.9.9.9"])
            .script_mutations(
                "block",
                vec![
                    Scripted::RateLimited(Some(Duration::from_secs(10))),
                    Scripted::RateLimited(Some(Duration::from_secs(10))),
                ],
            ),
    );

    let (engine, _rx, _timer) = build_engine(
        fetcher,
        provider.clone(),
        Arc::new(MemoryCacheStore::new()),
        config_for(&[("acct", "block", &[FEED])]),
    );
    let report = engine.run().await;

    match &report.pairs[0].outcome {
        SyncOutcome::Failed { reason } => {
            assert!(reason.starts_with("mutating"), "unexpected reason: {reason}");
            assert!(reason.contains("rate limited"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(provider.mutate_calls(), 2);
    assert_eq!(provider.entries("acct", "block"), vec!["9.9.9.9"]);
}

#[tokio::test]
async fn retries_can_be_disabled_via_config() {
    let fetcher = Arc::new(MockFetcher::new().with_feed(FEED, "1.2.3.4\n"));
    let provider = Arc::new(
        MockListProvider::new()
            .with_list("acct", "block", &["9.9.9.9"])
            .script_mutations("block", vec![Scripted::RateLimited(None)]),
    );

    let mut config = config_for(&[("acct", "block", &[FEED])]);
    config.engine.max_mutation_retries = 0;

    let (engine, _rx, timer) = build_engine(
        fetcher,
        provider.clone(),
        Arc::new(MemoryCacheStore::new()),
        config,
    );
    let report = engine.run().await;

    assert!(report.pairs[0].outcome.is_failed());
    assert_eq!(provider.mutate_calls(), 1);
    assert!(timer.sleeps().is_empty());
}

#[tokio::test]
async fn non_throttling_failures_are_not_retried() {
    for (scripted, transport) in [(Scripted::Rejected, false), (Scripted::Transport, true)] {
        let provider = Arc::new(
            MockListProvider::new()
                .with_list("acct", "block", &["9.9.9.9"])
                .script_mutations("block", vec![scripted]),
        );
        let timer = Arc::new(ManualTimer::new());
        let client = MutationClient::new(provider.clone(), timer.clone(), BackoffPolicy::default());
        let budgets = budgets_on(timer.clone());

        let desired = membership(&["1.2.3.4"]);
        let delta = diff(&membership(&["9.9.9.9"]), &desired);
        let handle = ListHandle::new("acct:block", "block");
        let err = client
            .apply(&budgets.budget_for("acct"), "acct", &handle, &delta, &desired)
            .await
            .unwrap_err();

        if transport {
            assert!(matches!(err, MutationError::Transport(_)));
        } else {
            assert!(matches!(err, MutationError::Rejected(_)));
        }
        assert_eq!(provider.mutate_calls(), 1);
        assert!(timer.sleeps().is_empty());
    }
}

#[tokio::test]
async fn fallback_wait_stays_within_backoff_window() {
    let provider = Arc::new(
        MockListProvider::new()
            .with_list("acct", "block", &[])
            .script_mutations("block", vec![Scripted::RateLimited(None)]),
    );
    let timer = Arc::new(ManualTimer::new());
    let policy = BackoffPolicy {
        max_retries: 1,
        fallback_min: Duration::from_secs(300),
        fallback_max: Duration::from_secs(600),
        max_wait: Duration::from_secs(3600),
    };
    let client = MutationClient::new(provider.clone(), timer.clone(), policy);
    let budgets = budgets_on(timer.clone());

    let desired = membership(&["1.2.3.4"]);
    let delta = diff(&ListMembership::new(), &desired);
    let handle = ListHandle::new("acct:block", "block");
    let result = client
        .apply(&budgets.budget_for("acct"), "acct", &handle, &delta, &desired)
        .await
        .unwrap();

    assert_eq!(result.attempts, 2);
    let sleeps = timer.sleeps();
    assert_eq!(sleeps.len(), 1);
    assert!(sleeps[0] >= Duration::from_secs(300) && sleeps[0] <= Duration::from_secs(600));
}

#[tokio::test]
async fn backoff_holds_back_same_account_only() {
    let provider = Arc::new(
        MockListProvider::new()
            .with_list("a", "block", &[])
            .script_mutations(
                "block",
                vec![
                    Scripted::RateLimited(Some(Duration::from_secs(30))),
                    Scripted::RateLimited(Some(Duration::from_secs(30))),
                ],
            ),
    );
    let timer = Arc::new(ManualTimer::new());
    let client = MutationClient::new(provider, timer.clone(), BackoffPolicy::default());
    let budgets = budgets_on(timer.clone());

    let desired = membership(&["1.2.3.4"]);
    let delta = diff(&ListMembership::new(), &desired);
    let handle = ListHandle::new("a:block", "block");
    let err = client
        .apply(&budgets.budget_for("a"), "a", &handle, &delta, &desired)
        .await
        .unwrap_err();
    assert!(matches!(err, MutationError::RateLimited { attempts: 2, .. }));

    // The first throttle was waited out; the second one is still pending
    let deadline = budgets.budget_for("a").blocked_until().unwrap();
    assert!(deadline > timer.now());
    assert!(budgets.budget_for("b").blocked_until().is_none());

    let sleeps_before = timer.sleeps().len();
    budgets.budget_for("b").acquire().await;
    assert_eq!(timer.sleeps().len(), sleeps_before, "other account must not wait");

    budgets.budget_for("a").acquire().await;
    assert_eq!(timer.sleeps().last(), Some(&Duration::from_secs(30)));
}

#[tokio::test]
async fn oversized_retry_after_is_capped() {
    let fetcher = Arc::new(MockFetcher::new().with_feed(FEED, "1.2.3.4\n"));
    let provider = Arc::new(
        MockListProvider::new()
            .with_list("acct", "block", &["9.9.9.9"])
            .script_mutations(
                "block",
                vec![Scripted::RateLimited(Some(Duration::from_secs(86_400)))],
            ),
    );

    let mut config = config_for(&[("acct", "block", &[FEED])]);
    config.engine.max_retry_after_secs = 120;

    let (engine, _rx, timer) = build_engine(
        fetcher,
        provider.clone(),
        Arc::new(MemoryCacheStore::new()),
        config,
    );
    let report = engine.run().await;

    assert_eq!(
        report.pairs[0].outcome,
        SyncOutcome::Updated {
            added: 1,
            removed: 1
        }
    );
    assert_eq!(timer.sleeps(), vec![Duration::from_secs(120)]);
}

#[tokio::test]
async fn unrepresentable_retry_after_gives_up_without_panicking() {
    let fetcher = Arc::new(MockFetcher::new().with_feed(FEED, "1.2.3.4\n"));
    let provider = Arc::new(
        MockListProvider::new()
            .with_list("acct", "block", &["9.9.9.9"])
            .script_mutations(
                "block",
                vec![Scripted::RateLimited(Some(Duration::from_secs(u64::MAX)))],
            ),
    );

    // A ceiling this large no longer bounds the wait
    let mut config = config_for(&[("acct", "block", &[FEED])]);
    config.engine.max_retry_after_secs = u64::MAX;

    let (engine, _rx, timer) = build_engine(
        fetcher,
        provider.clone(),
        Arc::new(MemoryCacheStore::new()),
        config,
    );
    let report = engine.run().await;

    match &report.pairs[0].outcome {
        SyncOutcome::Failed { reason } => {
            assert!(reason.starts_with("mutating"), "unexpected reason: {reason}");
            assert!(reason.contains("rate limited"), "unexpected reason: {reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(provider.mutate_calls(), 1);
    assert!(timer.sleeps().is_empty());
}

#[tokio::test]
async fn throttled_read_defers_account_by_capped_wait() {
    let fetcher = Arc::new(MockFetcher::new().with_feed(FEED, "1.2.3.4\n"));
    let provider = Arc::new(
        MockListProvider::new()
            .with_list("acct", "block", &["9.9.9.9"])
            .with_list("acct", "allow", &[])
            .fail_reads(
                "block",
                Scripted::RateLimited(Some(Duration::from_secs(u64::MAX))),
            ),
    );

    let (engine, _rx, timer) = build_engine(
        fetcher,
        provider.clone(),
        Arc::new(MemoryCacheStore::new()),
        config_for(&[("acct", "block", &[FEED]), ("acct", "allow", &[FEED])]),
    );
    let report = engine.run().await;

    for pair in &report.pairs {
        match pair.list.as_str() {
            "block" => match &pair.outcome {
                SyncOutcome::Failed { reason } => {
                    assert!(reason.starts_with("reading"), "unexpected reason: {reason}")
                }
                other => panic!("expected failure, got {other:?}"),
            },
            _ => assert_eq!(
                pair.outcome,
                SyncOutcome::Updated {
                    added: 1,
                    removed: 0
                }
            ),
        }
    }
    assert!(
        timer
            .sleeps()
            .iter()
            .all(|wait| *wait <= Duration::from_secs(3600))
    );
}
