//! Feed parsing
//!
//! Turns a raw feed body into a canonical [`ListMembership`]. This module is
//! pure; fetching the body is the job of a [`SourceFetcher`](crate::SourceFetcher)
//! implementation.

use serde_json::Value;

use crate::config::{FeedFormat, SourceDescriptor};
use crate::entry::{Entry, ListMembership};
use crate::error::{Error, Result};

/// Members under which a JSON object may carry its element array
const ARRAY_KEYS: [&str; 3] = ["result", "data", "items"];

/// Entries parsed from one or more feeds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMembership {
    /// Canonical entries
    pub membership: ListMembership,
    /// Elements dropped because they could not be canonicalized
    pub rejected: usize,
}

impl FetchedMembership {
    /// Fold another feed's result into this one
    pub fn merge(&mut self, other: FetchedMembership) {
        self.membership.extend(other.membership.iter().copied());
        self.rejected += other.rejected;
    }
}

/// Parse a feed body according to its format
pub fn parse_feed(format: FeedFormat, field: &str, body: &str) -> Result<FetchedMembership> {
    match format {
        FeedFormat::Json => parse_json(field, body),
        FeedFormat::Text => Ok(parse_text(body)),
    }
}

/// Parse a fetched body for `source`, enforcing its `allow_empty` flag
pub fn parse_source(source: &SourceDescriptor, body: &str) -> Result<FetchedMembership> {
    let fetched = parse_feed(source.format, &source.field, body)
        .map_err(|e| Error::fetch(format!("{}: {}", source.url, e)))?;

    if fetched.rejected > 0 {
        tracing::warn!(
            "Dropped {} invalid entries from {}",
            fetched.rejected,
            source.url
        );
    }

    if fetched.membership.is_empty() && !source.allow_empty {
        return Err(Error::fetch(format!(
            "{} yielded no entries (set allow_empty to accept this)",
            source.url
        )));
    }

    Ok(fetched)
}

fn parse_json(field: &str, body: &str) -> Result<FetchedMembership> {
    let document: Value = serde_json::from_str(body)
        .map_err(|e| Error::fetch(format!("feed is not valid JSON: {e}")))?;

    let elements = match &document {
        Value::Array(items) => items,
        Value::Object(map) => ARRAY_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .ok_or_else(|| {
                Error::fetch("JSON feed has no top-level array or result/data/items array")
            })?,
        _ => return Err(Error::fetch("JSON feed must be an array or an object")),
    };

    let mut fetched = FetchedMembership::default();
    for element in elements {
        let raw = match element {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get(field).and_then(Value::as_str),
            _ => None,
        };

        match raw.map(Entry::parse) {
            Some(Ok(entry)) => fetched.membership.extend([entry]),
            _ => {
                tracing::debug!("Rejected feed element: {}", element);
                fetched.rejected += 1;
            }
        }
    }

    Ok(fetched)
}

fn parse_text(body: &str) -> FetchedMembership {
    let mut fetched = FetchedMembership::default();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        let value = match line.split_once('#') {
            Some((value, _comment)) => value.trim(),
            None => line,
        };

        match Entry::parse(value) {
            Ok(entry) => fetched.membership.extend([entry]),
            Err(_) => {
                tracing::debug!("Rejected feed line: {}", line);
                fetched.rejected += 1;
            }
        }
    }

    fetched
}
