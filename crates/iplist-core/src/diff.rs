//! Membership diffing

use crate::entry::{Entry, ListMembership};

/// Changes that turn a current membership into a desired one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDelta {
    /// Entries to add (desired − current)
    pub additions: Vec<Entry>,
    /// Entries to remove (current − desired)
    pub removals: Vec<Entry>,
}

impl SyncDelta {
    /// Whether no change is needed
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    /// Total number of changed entries
    pub fn len(&self) -> usize {
        self.additions.len() + self.removals.len()
    }
}

/// Compute the delta from `current` to `desired`
///
/// Both sides are sorted sets, so the result is deterministic and sorted.
pub fn diff(current: &ListMembership, desired: &ListMembership) -> SyncDelta {
    SyncDelta {
        additions: desired.difference(current).copied().collect(),
        removals: current.difference(desired).copied().collect(),
    }
}
