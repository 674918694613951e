//! Remote list reader
//!
//! Reads the complete current membership of a remote list. The read is
//! all-or-nothing: a partially read list would turn into spurious removals
//! downstream, so any failure fails the whole read.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::budget::AccountBudget;
use crate::config::EngineConfig;
use crate::entry::{Entry, ListMembership};
use crate::error::{Error, Result};
use crate::traits::{ListHandle, ListProvider};

/// A fully read remote list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteList {
    /// Provider handle, reused for the mutation
    pub handle: ListHandle,
    /// Current membership
    pub membership: ListMembership,
}

/// Paginated, budgeted reader over a [`ListProvider`]
pub struct ListReader {
    provider: Arc<dyn ListProvider>,
    max_pages: usize,
    max_wait: Duration,
}

impl ListReader {
    /// Create a reader
    pub fn new(provider: Arc<dyn ListProvider>, max_pages: usize) -> Self {
        Self {
            provider,
            max_pages,
            max_wait: EngineConfig::default().max_retry_after(),
        }
    }

    /// Cap the account backoff a throttled read may impose
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Resolve `list_name` and read every page of it
    pub async fn read(
        &self,
        budget: &AccountBudget,
        account_id: &str,
        list_name: &str,
    ) -> Result<RemoteList> {
        budget.acquire().await;
        let handle = self
            .provider
            .resolve_list(account_id, list_name)
            .await
            .map_err(|e| self.read_error(budget, list_name, "lookup failed", e))?;

        let mut membership = ListMembership::new();
        let mut seen_cursors = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            if pages == self.max_pages {
                return Err(Error::read(format!(
                    "list '{}' exceeds {} pages",
                    list_name, self.max_pages
                )));
            }

            budget.acquire().await;
            let page = self
                .provider
                .read_page(account_id, &handle, cursor.as_deref())
                .await
                .map_err(|e| {
                    self.read_error(budget, list_name, &format!("page {} failed", pages + 1), e)
                })?;
            pages += 1;

            for raw in &page.entries {
                let entry = Entry::parse(raw).map_err(|_| {
                    Error::read(format!(
                        "list '{list_name}' holds an unparseable entry: {raw}"
                    ))
                })?;
                membership.extend([entry]);
            }

            match page.next_cursor {
                Some(next) => {
                    if !seen_cursors.insert(next.clone()) {
                        return Err(Error::read(format!(
                            "list '{list_name}' returned a repeated cursor"
                        )));
                    }
                    cursor = Some(next);
                }
                None => break,
            }
        }

        tracing::debug!(
            "Read {} entries from list '{}' in {} page(s)",
            membership.len(),
            list_name,
            pages
        );

        Ok(RemoteList { handle, membership })
    }

    fn read_error(&self, budget: &AccountBudget, list_name: &str, what: &str, err: Error) -> Error {
        if let Error::RateLimited {
            retry_after: Some(wait),
        } = &err
        {
            // Hold back the rest of the account as well
            if !budget.defer_for((*wait).min(self.max_wait)) {
                tracing::warn!("Ignoring unrepresentable retry-after of {:?}", wait);
            }
        }
        Error::read(format!("list '{list_name}': {what}: {err}"))
    }
}
