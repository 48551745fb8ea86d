//! Token-keyed cache of introspection results.
//!
//! Entries are keyed by the raw token string, never by subject, so two tokens
//! for the same user are cached independently. An entry lives for the
//! configured TTL or until the token's own `exp`, whichever comes first.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;

use super::introspection::IntrospectionResult;

/// Default cache TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Longest TTL the cache accepts; longer values are clamped.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Default upper bound on cached tokens.
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 10_000;

/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> SystemTime;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only moves when told to.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use calendar_mcp::oauth::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(30));
/// assert_eq!(clock.now(), start + Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<SystemTime>>,
}

impl ManualClock {
    /// Start at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    pub fn starting_at(now: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A cached introspection result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: IntrospectionResult,
    pub cached_at: SystemTime,
    evict_at: SystemTime,
}

impl CacheEntry {
    fn is_live(&self, now: SystemTime) -> bool {
        now < self.evict_at
    }
}

/// Concurrent, TTL-bounded cache of introspection results.
///
/// Cloning is cheap and clones share the same entries. Created once at
/// startup and handed to the [`IntrospectionClient`](super::IntrospectionClient).
#[derive(Clone)]
pub struct IntrospectionCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for IntrospectionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntrospectionCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

impl Default for IntrospectionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl IntrospectionCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// `ttl` is clamped to [`MAX_CACHE_TTL`].
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl: ttl.min(MAX_CACHE_TTL),
            max_entries: DEFAULT_MAX_CACHE_ENTRIES,
            clock,
        }
    }

    /// Cap the number of cached tokens. At the cap, stale entries are purged
    /// first, then the entry closest to eviction makes room.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn now(&self) -> SystemTime {
        self.clock.now()
    }

    /// Look up a live entry. Stale entries are evicted on the way.
    pub fn get(&self, token: &str) -> Option<IntrospectionResult> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(token) {
            if entry.is_live(now) {
                return Some(entry.result.clone());
            }
        }
        self.entries.remove_if(token, |_, entry| !entry.is_live(now));
        None
    }

    /// Cache a result. Returns `false` when the entry would already be stale
    /// (zero TTL, or a token whose `exp` has passed) and was not stored.
    pub fn insert(&self, token: &str, result: IntrospectionResult) -> bool {
        let now = self.clock.now();
        let Some(mut evict_at) = now.checked_add(self.ttl) else {
            return false;
        };
        if let Some(exp) = result.expires_at {
            evict_at = evict_at.min(exp);
        }
        if evict_at <= now {
            return false;
        }

        if !self.entries.contains_key(token) && self.entries.len() >= self.max_entries {
            self.make_room();
        }
        self.entries.insert(
            token.to_string(),
            CacheEntry {
                result,
                cached_at: now,
                evict_at,
            },
        );
        true
    }

    /// Drop every stale entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "Purged introspection cache");
        }
        removed
    }

    fn make_room(&self) {
        if self.purge_expired() > 0 && self.entries.len() < self.max_entries {
            return;
        }
        let soonest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().evict_at)
            .map(|entry| entry.key().clone());
        if let Some(token) = soonest {
            self.entries.remove(&token);
            tracing::debug!(max_entries = self.max_entries, "Introspection cache full, evicted one entry");
        }
    }

    /// Purge stale entries every `every` until the runtime shuts down.
    pub fn spawn_purge_task(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        let every = every.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                cache.purge_expired();
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
