//! Calendar cache with a fixed TTL and stale fallback.
//!
//! Holds at most one rendered [`CalendarDocument`]. An entry younger than the
//! TTL is served as-is; an older one is only handed out when regeneration
//! fails.

use std::fmt;
use std::time::Duration;

use bookfeed_core::CalendarDocument;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace};

/// How long a generated calendar is served without refetching.
pub const CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Freshness of the cache at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Empty,
    Fresh,
    Stale,
}

/// How a response was produced, reported in the `X-Cache` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a fresh entry.
    Hit,
    /// Freshly generated.
    Miss,
    /// Generation failed; served the previous document.
    Stale,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Stale => "STALE",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The last successfully generated document.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub document: CalendarDocument,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Age at `now`. A store time in the future counts as age zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Single-entry calendar cache.
#[derive(Debug)]
pub struct FeedCache {
    ttl: Duration,
    entry: Option<CacheEntry>,
}

impl Default for FeedCache {
    fn default() -> Self {
        Self::new(CACHE_TTL)
    }
}

impl FeedCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        self.entry.as_ref()
    }

    /// Returns the freshness at `now`.
    pub fn state(&self, now: DateTime<Utc>) -> CacheState {
        match self.entry {
            None => CacheState::Empty,
            Some(ref entry) if entry.age(now) < self.ttl => CacheState::Fresh,
            Some(_) => CacheState::Stale,
        }
    }

    /// Returns the cached document if it may be served without regenerating.
    ///
    /// `force` bypasses a fresh entry.
    pub fn lookup(&self, now: DateTime<Utc>, force: bool) -> Option<CalendarDocument> {
        let state = self.state(now);
        trace!(state = ?state, force, "Cache lookup");
        match (state, force) {
            (CacheState::Fresh, false) => self.entry.as_ref().map(|e| e.document.clone()),
            _ => None,
        }
    }

    /// The last good document regardless of age.
    pub fn fallback(&self) -> Option<CalendarDocument> {
        self.entry.as_ref().map(|e| e.document.clone())
    }

    /// Replaces the entry.
    pub fn store(&mut self, document: CalendarDocument, now: DateTime<Utc>) {
        debug!(events = document.event_count(), "Stored calendar");
        self.entry = Some(CacheEntry {
            document,
            stored_at: now,
        });
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }
}
