//! Test doubles and common utilities for contract tests
//!
//! The doubles record every call so tests can assert on how often the
//! engine touched the network, and in which order.

#![allow(dead_code)]

use async_trait::async_trait;
use iplist_core::budget::BudgetRegistry;
use iplist_core::error::{Error, Result};
use iplist_core::feed::{self, FetchedMembership};
use iplist_core::{
    AccountConfig, BulkMutation, CacheStore, EngineEvent, FeedFormat, ListConfig, ListHandle,
    ListPage, ListProvider, Notifier, PairReport, ReportSink, RunReport, SourceDescriptor,
    EngineConfig, SourceFetcher, SyncConfig, SyncEngine, Timer,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Feed fetcher serving canned bodies by URL
#[derive(Default)]
pub struct MockFetcher {
    feeds: Mutex<HashMap<String, std::result::Result<String, String>>>,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url`
    pub fn with_feed(self, url: &str, body: &str) -> Self {
        self.set_feed(url, body);
        self
    }

    /// Fail every fetch of `url`
    pub fn with_failure(self, url: &str, message: &str) -> Self {
        self.feeds
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(message.to_string()));
        self
    }

    /// Replace the body served at `url`
    pub fn set_feed(&self, url: &str, body: &str) {
        self.feeds
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(body.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for MockFetcher {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<FetchedMembership> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let served = self.feeds.lock().unwrap().get(&source.url).cloned();
        match served {
            Some(Ok(body)) => feed::parse_source(source, &body),
            Some(Err(message)) => Err(Error::fetch(format!("{}: {}", source.url, message))),
            None => Err(Error::fetch(format!("{}: 404 Not Found", source.url))),
        }
    }
}

/// Failure a scripted provider call should produce
#[derive(Debug, Clone)]
pub enum Scripted {
    RateLimited(Option<Duration>),
    Rejected,
    Transport,
    NotFound,
}

impl Scripted {
    fn into_error(self) -> Error {
        match self {
            Scripted::RateLimited(retry_after) => Error::rate_limited(retry_after),
            Scripted::Rejected => Error::rejected("invalid item payload"),
            Scripted::Transport => Error::http("502 Bad Gateway"),
            Scripted::NotFound => Error::not_found("list not found"),
        }
    }
}

#[derive(Default)]
struct ProviderState {
    lists: HashMap<(String, String), Vec<String>>,
    read_failures: HashMap<String, Scripted>,
    mutate_script: HashMap<String, VecDeque<Scripted>>,
    mutations: Vec<(String, String, BulkMutation)>,
    repeat_cursor: bool,
}

/// In-memory list provider with paging, scripted failures and call counters
pub struct MockListProvider {
    state: Mutex<ProviderState>,
    page_size: usize,
    resolve_calls: AtomicUsize,
    read_calls: AtomicUsize,
    mutate_calls: AtomicUsize,
}

impl MockListProvider {
    pub fn new() -> Self {
        Self::with_page_size(500)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(ProviderState::default()),
            page_size,
            resolve_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
            mutate_calls: AtomicUsize::new(0),
        }
    }

    /// Create a remote list holding `entries`
    pub fn with_list(self, account: &str, list: &str, entries: &[&str]) -> Self {
        self.state.lock().unwrap().lists.insert(
            (account.to_string(), list.to_string()),
            entries.iter().map(|e| e.to_string()).collect(),
        );
        self
    }

    /// Fail every page read of `list`
    pub fn fail_reads(self, list: &str, failure: Scripted) -> Self {
        self.state
            .lock()
            .unwrap()
            .read_failures
            .insert(list.to_string(), failure);
        self
    }

    /// Queue failures for the next bulk mutations of `list`
    pub fn script_mutations(self, list: &str, script: Vec<Scripted>) -> Self {
        self.state
            .lock()
            .unwrap()
            .mutate_script
            .insert(list.to_string(), script.into());
        self
    }

    /// Return the same non-empty cursor on every page
    pub fn with_repeating_cursor(self) -> Self {
        self.state.lock().unwrap().repeat_cursor = true;
        self
    }

    /// Current remote entries of a list
    pub fn entries(&self, account: &str, list: &str) -> Vec<String> {
        let mut entries = self
            .state
            .lock()
            .unwrap()
            .lists
            .get(&(account.to_string(), list.to_string()))
            .cloned()
            .unwrap_or_default();
        entries.sort();
        entries
    }

    /// Successful mutations, in call order
    pub fn mutations(&self) -> Vec<(String, String, BulkMutation)> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn mutate_calls(&self) -> usize {
        self.mutate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListProvider for MockListProvider {
    async fn resolve_list(&self, account_id: &str, list_name: &str) -> Result<ListHandle> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let key = (account_id.to_string(), list_name.to_string());
        match state.lists.get(&key) {
            Some(entries) => Ok(ListHandle {
                id: format!("{account_id}:{list_name}"),
                name: list_name.to_string(),
                kind: Some("ip".to_string()),
                num_items: Some(entries.len() as u64),
            }),
            None => Err(Error::not_found(format!("list '{list_name}'"))),
        }
    }

    async fn read_page(
        &self,
        account_id: &str,
        list: &ListHandle,
        cursor: Option<&str>,
    ) -> Result<ListPage> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if let Some(failure) = state.read_failures.get(&list.name) {
            return Err(failure.clone().into_error());
        }

        let entries = state
            .lists
            .get(&(account_id.to_string(), list.name.clone()))
            .cloned()
            .unwrap_or_default();

        if state.repeat_cursor {
            return Ok(ListPage {
                entries: Vec::new(),
                next_cursor: Some("same".to_string()),
            });
        }

        let start: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let end = (start + self.page_size).min(entries.len());
        Ok(ListPage {
            entries: entries[start..end].to_vec(),
            next_cursor: (end < entries.len()).then(|| end.to_string()),
        })
    }

    async fn bulk_mutate(
        &self,
        account_id: &str,
        list: &ListHandle,
        mutation: &BulkMutation,
    ) -> Result<()> {
        self.mutate_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state
            .mutate_script
            .get_mut(&list.name)
            .and_then(VecDeque::pop_front)
        {
            return Err(failure.into_error());
        }

        state.lists.insert(
            (account_id.to_string(), list.name.clone()),
            mutation.target.iter().map(ToString::to_string).collect(),
        );
        state
            .mutations
            .push((account_id.to_string(), list.name.clone(), mutation.clone()));
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// Timer that advances instantly and records every sleep
pub struct ManualTimer {
    base: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }
}

#[async_trait]
impl Timer for ManualTimer {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        *self.offset.lock().unwrap() += duration;
        tokio::task::yield_now().await;
    }
}

/// Report sink keeping every report
#[derive(Default)]
pub struct RecordingSink {
    pub reports: Mutex<Vec<RunReport>>,
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn emit(&self, report: &RunReport) -> Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

/// Notifier keeping every (webhook, pair) it was asked to send
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, PairReport)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, webhook: &str, report: &PairReport) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((webhook.to_string(), report.clone()));
        Ok(())
    }
}

/// Plain-text source at `url`
pub fn source(url: &str) -> SourceDescriptor {
    SourceDescriptor::new(url, FeedFormat::Text)
}

/// Configuration with one list per `(account, list, source urls)` triple
pub fn config_for(pairs: &[(&str, &str, &[&str])]) -> SyncConfig {
    let mut config = SyncConfig::new();
    for (account, list, urls) in pairs {
        let mut list_config = ListConfig::new(*list);
        for url in *urls {
            list_config = list_config.with_source(source(url));
        }

        match config.accounts.iter_mut().find(|a| a.id == *account) {
            Some(existing) => existing.lists.push(list_config),
            None => config
                .accounts
                .push(AccountConfig::new(*account).with_list(list_config)),
        }
    }
    config
}

/// Build an engine over the doubles, driven by a manual timer
pub fn build_engine(
    fetcher: Arc<MockFetcher>,
    provider: Arc<MockListProvider>,
    cache: Arc<dyn CacheStore>,
    config: SyncConfig,
) -> (SyncEngine, mpsc::Receiver<EngineEvent>, Arc<ManualTimer>) {
    let timer = Arc::new(ManualTimer::new());
    let (engine, rx) = SyncEngine::new(fetcher, provider, cache, config)
        .expect("Failed to create engine");
    (engine.with_timer(timer.clone()), rx, timer)
}

/// Budgets with default settings, measured on `timer`
pub fn budgets_on(timer: Arc<ManualTimer>) -> BudgetRegistry {
    BudgetRegistry::from_settings(&EngineConfig::default(), timer)
        .expect("Failed to create budgets")
}

/// Collect every event currently buffered
pub fn drain_events(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
