//! Process-wide TTL cache shared by every upstream client.
//!
//! [`TtlCache`] stores opaque values under a `(namespace, key)` pair with a
//! per-entry TTL. It is built on moka's async cache:
//!
//! - expiry is evaluated per entry (an [`Expiry`] policy reads the TTL the
//!   entry was inserted with), and expired entries are never returned;
//! - expired entries are evicted lazily on lookup, and [`TtlCache::sweep`]
//!   removes every entry whose deadline has passed; [`TtlCache::spawn_sweeper`]
//!   runs it on an interval;
//! - capacity is bounded (LRU-ish) so long-running processes stay flat.
//!
//! # In-flight de-duplication
//!
//! [`TtlCache::get_or_compute`] uses `try_get_with`, so concurrent callers
//! that miss on the same key share one factory invocation instead of each
//! paying the upstream cost. A failed factory caches nothing; all joined
//! callers receive the same error.

mod key;
mod ttl;

pub use key::{CacheKey, normalize_id, normalize_query, request_key};
pub use ttl::{CacheTtls, TtlClass};

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::telemetry;
use crate::{MimirError, Result};

/// Configuration for the shared cache.
///
/// ```rust
/// # use mimir::cache::CacheConfig;
/// let config = CacheConfig::new().max_entries(500);
/// assert_eq!(config.max_entries, 500);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Default: 10,000.
    pub max_entries: u64,
    /// Period of the background sweep. Default: 60 seconds.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

#[derive(Clone)]
struct CachedEntry {
    value: Arc<dyn Any + Send + Sync>,
    ttl: Duration,
    /// `None` when `ttl` overflows the clock.
    expires_at: Option<Instant>,
}

impl CachedEntry {
    fn new<T: Send + Sync + 'static>(value: T, ttl: Duration) -> Self {
        Self {
            value: Arc::new(value),
            ttl,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    fn downcast<T: Clone + 'static>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }
}

/// Expire each entry `ttl` after it was created or last overwritten.
struct PerEntryTtl;

impl Expiry<CacheKey, CachedEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &CachedEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &CachedEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory key-value store with per-entry expiration.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct TtlCache {
    entries: Cache<CacheKey, CachedEntry>,
}

impl TtlCache {
    pub fn new(config: &CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(PerEntryTtl)
            .support_invalidation_closures()
            .build();
        Self { entries }
    }

    /// Store `value`, unconditionally replacing any existing entry; expires
    /// `ttl` from now.
    pub async fn set<T>(&self, namespace: &str, key: &str, value: T, ttl: Duration)
    where
        T: Send + Sync + 'static,
    {
        self.entries
            .insert(CacheKey::new(namespace, key), CachedEntry::new(value, ttl))
            .await;
    }

    /// Fetch an unexpired value.
    ///
    /// Returns `None` when absent, expired, or stored with a different type.
    pub async fn get<T>(&self, namespace: &str, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.entries
            .get(&CacheKey::new(namespace, key))
            .await
            .and_then(|entry| entry.downcast::<T>())
    }

    /// Whether an unexpired entry exists.
    pub fn has(&self, namespace: &str, key: &str) -> bool {
        self.entries.contains_key(&CacheKey::new(namespace, key))
    }

    pub async fn delete(&self, namespace: &str, key: &str) {
        self.entries.invalidate(&CacheKey::new(namespace, key)).await;
    }

    /// Drop every entry in `namespace`.
    pub fn clear_namespace(&self, namespace: &str) {
        let namespace = namespace.to_string();
        if let Err(e) = self
            .entries
            .invalidate_entries_if(move |key, _| key.namespace() == namespace)
        {
            warn!(error = %e, "failed to register namespace invalidation");
        }
    }

    pub fn flush_all(&self) {
        self.entries.invalidate_all();
    }

    /// Remove every entry whose TTL has elapsed, then run pending
    /// housekeeping so [`len`](Self::len) reflects the removal.
    ///
    /// An entry overwritten after the sweep starts is kept.
    pub async fn sweep(&self) {
        let now = Instant::now();
        if let Err(e) = self
            .entries
            .invalidate_entries_if(move |_, entry| entry.is_expired(now))
        {
            warn!(error = %e, "failed to register expiry sweep");
        }
        self.entries.run_pending_tasks().await;
    }

    /// Run [`sweep`](Self::sweep) every `interval` on the current runtime.
    ///
    /// The task stops when the returned handle is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> Sweeper {
        let cache = self.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                cache.sweep().await;
                debug!(entries = cache.len(), "cache sweep completed");
            }
        });
        info!(interval_secs = interval.as_secs_f64(), "cache sweep task started");
        Sweeper { task }
    }

    /// Approximate number of entries. Call [`sweep`](Self::sweep) first for
    /// an exact count.
    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached value, or compute, store and return it.
    ///
    /// On a hit the factory is not invoked. On factory failure nothing is
    /// stored and the error propagates.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        ttl: Duration,
        factory: F,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.get_or_compute_with_ttl(namespace, key, || async move {
            factory().await.map(|value| (value, ttl))
        })
        .await
    }

    /// Like [`get_or_compute`](Self::get_or_compute), but the factory picks
    /// the TTL alongside the value.
    pub async fn get_or_compute_with_ttl<T, F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        factory: F,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(T, Duration)>>,
    {
        let cache_key = CacheKey::new(namespace, key);
        let computed = AtomicBool::new(false);

        let init = async {
            computed.store(true, Ordering::Relaxed);
            let (value, ttl) = factory().await?;
            Ok::<_, MimirError>(CachedEntry::new(value, ttl))
        };

        let entry = self
            .entries
            .try_get_with(cache_key.clone(), init)
            .await
            .map_err(Arc::unwrap_or_clone)?;

        if computed.load(Ordering::Relaxed) {
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "namespace" => namespace.to_owned())
                .increment(1);
            debug!(key = %cache_key, "cache miss, value computed");
        } else {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "namespace" => namespace.to_owned())
                .increment(1);
            debug!(key = %cache_key, "cache hit");
        }

        entry.downcast::<T>().ok_or_else(|| {
            MimirError::Internal(format!("cached value under {cache_key} has an unexpected type"))
        })
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

/// Background sweep task started by [`TtlCache::spawn_sweeper`]; aborted on drop.
pub struct Sweeper {
    task: JoinHandle<()>,
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.task.abort();
    }
}
