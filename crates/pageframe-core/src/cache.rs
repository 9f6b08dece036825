//! In-memory content caching with moka.
//!
//! Two named instances are used by the pipeline:
//!
//! | Cache | Holds | Default TTL |
//! |-------|-------|-------------|
//! | `proxy` | rewritten target pages | 5 min |
//! | `pages` | embed wrapper pages | 10 min |
//!
//! Entries carry their own TTL and are immutable once stored; storing the
//! same key again replaces the entry and restarts its TTL. A read past expiry
//! is a miss and invalidates the entry. Expired entries that are never read
//! are dropped by moka's housekeeping, which [`ContentCache::sweep`] runs on
//! demand and [`spawn_sweeper`] runs periodically. Housekeeping expires
//! entries on a timer wheel with roughly one second of granularity.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::future::Cache;
use tokio::task::JoinHandle;

/// A cached document with the TTL it was stored with.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    /// Rendered HTML.
    pub html: Arc<str>,
    /// When this entry stops being served.
    pub expires_at: DateTime<Utc>,
    /// How long the entry stays valid.
    pub ttl: Duration,
}

impl CacheEntry {
    fn new(html: impl Into<Arc<str>>, ttl: Duration) -> Self {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            html: html.into(),
            expires_at,
            ttl,
        }
    }

    /// Whether the entry's TTL has elapsed.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Expiry policy reading the TTL stored in each entry.
struct PerEntryTtl;

impl Expiry<String, CacheEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// A named, TTL-bounded HTML cache keyed by exact target URL.
#[derive(Clone)]
pub struct ContentCache {
    name: &'static str,
    default_ttl: Duration,
    inner: Cache<String, CacheEntry>,
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("name", &self.name)
            .field("default_ttl", &self.default_ttl)
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

impl ContentCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(name: &'static str, capacity: u64, default_ttl: Duration) -> Self {
        let inner = Cache::builder()
            .name(name)
            .max_capacity(capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self {
            name,
            default_ttl,
            inner,
        }
    }

    /// Cache name, used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// TTL applied by [`ContentCache::get_or_try_insert_with`].
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a key. An expired entry is a miss and is invalidated.
    pub async fn get(&self, key: &str) -> Option<Arc<str>> {
        match self.inner.get(key).await {
            Some(entry) if !entry.is_expired() => Some(entry.html),
            _ => {
                self.inner.invalidate(key).await;
                None
            }
        }
    }

    /// Store a value with an explicit TTL, replacing any existing entry.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<Arc<str>>, ttl: Duration) {
        self.inner
            .insert(key.into(), CacheEntry::new(value, ttl))
            .await;
    }

    /// Return the cached value, or run `init` and store its result.
    ///
    /// Concurrent calls for the same missing key are coalesced: `init` runs
    /// once and the other callers wait for its result. Errors are not cached.
    ///
    /// Returns the value and whether this call inserted it (a miss).
    pub async fn get_or_try_insert_with<F, E>(
        &self,
        key: &str,
        init: F,
    ) -> Result<(Arc<str>, bool), Arc<E>>
    where
        F: Future<Output = Result<String, E>>,
        E: Send + Sync + 'static,
    {
        let ttl = self.default_ttl;
        let entry = self
            .inner
            .entry_by_ref(key)
            .or_try_insert_with(async move {
                let html = init.await?;
                Ok(CacheEntry::new(html, ttl))
            })
            .await?;

        let fresh = entry.is_fresh();
        Ok((entry.into_value().html, fresh))
    }

    /// Number of live entries, as of the last housekeeping run.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Run pending housekeeping, evicting expired entries.
    pub async fn sweep(&self) {
        self.inner.run_pending_tasks().await;
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
    }
}

/// Spawn a background task sweeping the given caches every `period`.
///
/// Abort the returned handle at shutdown.
pub fn spawn_sweeper(caches: Vec<ContentCache>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for cache in &caches {
                cache.sweep().await;
                tracing::trace!(
                    cache = cache.name(),
                    entries = cache.entry_count(),
                    "cache swept"
                );
            }
        }
    })
}
