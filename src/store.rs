//! Persistent-store seam: the identifier and record types the update loop
//! reasons about, and the trait it queries the backing store through.

use anyhow::Result;
use chrono::{DateTime, Utc};
use core::future::Future;
use core::pin::Pin;
use std::collections::BTreeSet;
use std::fmt;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Name of a newsgroup, e.g. `alt.binaries.sounds`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupName(String);

impl GroupName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for GroupName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A binary assembled from raw article parts, awaiting release grouping.
///
/// The update loop only ever reads the `posted` timestamp: binaries whose
/// `posted` is at or before the retention cutoff are purged during cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryRecord {
    name: String,
    posted: DateTime<Utc>,
}

impl BinaryRecord {
    pub fn new(name: impl Into<String>, posted: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            posted,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn posted(&self) -> DateTime<Utc> {
        self.posted
    }

    /// Whether this binary is dead under the given cutoff. The comparison is
    /// inclusive: a binary posted exactly at the cutoff is already dead.
    pub fn expired_by(&self, cutoff: DateTime<Utc>) -> bool {
        self.posted <= cutoff
    }
}

/// Handle to the persistent store, injected into the scheduler at
/// construction time.
pub trait Store: Send + Sync + 'static {
    /// Returns the set of groups currently flagged active. Queried fresh at
    /// the start of every cycle; implementations must not cache across calls.
    fn list_active_groups(&self) -> StoreFuture<'_, BTreeSet<GroupName>>;

    /// Deletes every binary with `posted <= cutoff` and returns how many
    /// records were removed.
    fn delete_binaries_posted_before(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64>;
}
