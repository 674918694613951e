//! Canonical IP entries and list membership
//!
//! Every address or CIDR that enters the system, whether from a feed or from
//! the remote list, goes through [`Entry::parse`]. Set comparisons and
//! fingerprints are only meaningful because both sides share this form.
//!
//! ## Canonical Form
//!
//! - surrounding whitespace trimmed
//! - IPv4 octets without leading zeros (`010.001.002.003` → `10.1.2.3`)
//! - IPv6 compressed and lower-case (`2001:DB8:0::1` → `2001:db8::1`)
//! - host bits cleared (`10.1.2.3/8` → `10.0.0.0/8`)
//! - host-length prefixes collapse to the bare address (`1.2.3.4/32` → `1.2.3.4`)

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::{Error, Result};

/// A single IP address or CIDR block in canonical form
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Entry(IpNet);

impl Entry {
    /// Parse and canonicalize a raw entry
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::invalid_input("empty entry"));
        }

        let (addr_part, prefix_part) = match raw.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (raw, None),
        };

        let addr = parse_addr(addr_part)
            .ok_or_else(|| Error::invalid_input(format!("not an IP address: {raw}")))?;

        let max_prefix = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = match prefix_part {
            Some(p) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => p
                .parse::<u8>()
                .map_err(|_| Error::invalid_input(format!("invalid prefix length: {raw}")))?,
            Some(_) => return Err(Error::invalid_input(format!("invalid prefix length: {raw}"))),
            None => max_prefix,
        };

        let net = IpNet::new(addr, prefix_len)
            .map_err(|_| Error::invalid_input(format!("prefix length out of range: {raw}")))?;

        Ok(Self(net.trunc()))
    }

    /// The underlying network
    pub fn net(&self) -> IpNet {
        self.0
    }

    /// Whether this entry is a single host rather than a range
    pub fn is_host(&self) -> bool {
        self.0.prefix_len() == self.0.max_prefix_len()
    }

    /// Whether this is an IPv4 entry
    pub fn is_ipv4(&self) -> bool {
        matches!(self.0, IpNet::V4(_))
    }
}

/// Canonicalize a raw entry string
///
/// Idempotent: `canonicalize(&canonicalize(x)?)? == canonicalize(x)?`.
pub fn canonicalize(raw: &str) -> Result<String> {
    Entry::parse(raw).map(|entry| entry.to_string())
}

fn parse_addr(s: &str) -> Option<IpAddr> {
    if s.contains(':') {
        return s.parse::<Ipv6Addr>().ok().map(IpAddr::V6);
    }

    // std rejects zero-padded octets; accept them and drop the padding
    let mut octets = [0u8; 4];
    let mut parts = s.split('.');
    for octet in &mut octets {
        let part = parts.next()?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = part.parse::<u8>().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }

    Some(IpAddr::V4(Ipv4Addr::from(octets)))
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            write!(f, "{}", self.0.addr())
        } else {
            write!(f, "{}/{}", self.0.network(), self.0.prefix_len())
        }
    }
}

impl FromStr for Entry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Entry {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Entry> for String {
    fn from(entry: Entry) -> Self {
        entry.to_string()
    }
}

/// Deterministic digest of a membership, hex-encoded SHA-256
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hex string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The set of entries held by one list at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListMembership {
    entries: BTreeSet<Entry>,
}

impl ListMembership {
    /// Create an empty membership
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the membership has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `entry` is a member
    pub fn contains(&self, entry: &Entry) -> bool {
        self.entries.contains(entry)
    }

    /// Iterate entries in set order
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Entries present here but not in `other`
    pub fn difference<'a>(&'a self, other: &'a ListMembership) -> impl Iterator<Item = &'a Entry> {
        self.entries.difference(&other.entries)
    }

    /// Union of two memberships
    pub fn union(&self, other: &ListMembership) -> ListMembership {
        self.entries.union(&other.entries).copied().collect()
    }

    /// Fingerprint over the sorted canonical entries
    ///
    /// The text form is sorted explicitly so the digest never depends on
    /// the in-memory ordering of `Entry`.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut lines: Vec<String> = self.entries.iter().map(ToString::to_string).collect();
        lines.sort_unstable();

        let mut hasher = Sha256::new();
        for line in &lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }

        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Canonical strings, sorted
    pub fn to_strings(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.entries.iter().map(ToString::to_string).collect();
        lines.sort_unstable();
        lines
    }
}

impl FromIterator<Entry> for ListMembership {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Extend<Entry> for ListMembership {
    fn extend<I: IntoIterator<Item = Entry>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

impl<'a> IntoIterator for &'a ListMembership {
    type Item = &'a Entry;
    type IntoIter = std::collections::btree_set::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
