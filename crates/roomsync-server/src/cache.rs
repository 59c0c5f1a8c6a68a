//! Single-flight TTL caches.
//!
//! [`TtlCache`] holds one value with an expiry. Concurrent callers that
//! miss share one recomputation, and a failed recomputation falls back to
//! the last good value when there is one.
//!
//! [`AvailabilityCache`] puts the aggregated availability behind a
//! [`TtlCache`]; [`CachedFeedFetcher`] keeps one per feed URL for the live
//! read path.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use roomsync_core::AggregatedInterval;
use roomsync_providers::{BoxFuture, FeedFetcher, ProviderError, ProviderResult};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::aggregate::Aggregator;
use crate::clock::{Clock, system_clock};
use crate::store::StoreResult;

/// Default time a computed value is served before recomputing.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// A cached value and when it was computed.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    fetched_at: Instant,
    /// Set by [`TtlCache::invalidate`]; the value is kept for stale fallback.
    stale: bool,
}

impl<T> CacheEntry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            stale: false,
        }
    }

    /// Returns true if the entry may be served without recomputing.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        !self.stale && self.fetched_at.elapsed() < ttl
    }

    /// Time since the value was computed.
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// One value with a TTL and single-flight recomputation.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    slot: RwLock<Option<CacheEntry<T>>>,
    /// Held while a recomputation is in flight.
    flight: Mutex<()>,
    /// Bumped by every invalidation, under the slot write lock.
    generation: AtomicU64,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
            flight: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value, computing it first if missing or expired.
    ///
    /// Callers that arrive while another caller is computing wait for that
    /// result instead of starting their own. If `compute` fails, the last
    /// good value is returned when one exists; otherwise the error is.
    pub async fn get_or_compute<F, Fut, E>(&self, compute: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        if let Some(value) = self.fresh().await {
            trace!("Cache hit");
            return Ok(value);
        }

        let _flight = self.flight.lock().await;
        if let Some(value) = self.fresh().await {
            trace!("Cache filled by concurrent caller");
            return Ok(value);
        }

        debug!(ttl_secs = self.ttl.as_secs(), "Cache miss, recomputing");
        let generation = self.generation.load(Ordering::Acquire);
        match compute().await {
            Ok(value) => {
                let mut slot = self.slot.write().await;
                let mut entry = CacheEntry::new(value.clone());
                // An invalidation that landed mid-compute may predate the
                // data this value was built from.
                if self.generation.load(Ordering::Acquire) != generation {
                    debug!("Cache invalidated during recompute, storing as stale");
                    entry.stale = true;
                }
                *slot = Some(entry);
                Ok(value)
            }
            Err(e) => match self.slot.read().await.as_ref() {
                Some(entry) => {
                    warn!(
                        error = %e,
                        age_secs = entry.age().as_secs(),
                        "Recompute failed, serving stale value"
                    );
                    Ok(entry.value.clone())
                }
                None => Err(e),
            },
        }
    }

    /// Forces the next read to recompute. The old value stays available as
    /// a stale fallback.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(entry) = slot.as_mut() {
            entry.stale = true;
            debug!("Cache invalidated");
        }
    }

    /// Age of the cached value, if any.
    pub async fn age(&self) -> Option<Duration> {
        self.slot.read().await.as_ref().map(CacheEntry::age)
    }

    /// The cached value regardless of freshness.
    pub async fn peek(&self) -> Option<T> {
        self.slot.read().await.as_ref().map(|e| e.value.clone())
    }

    async fn fresh(&self) -> Option<T> {
        self.slot
            .read()
            .await
            .as_ref()
            .filter(|entry| entry.is_fresh(self.ttl))
            .map(|entry| entry.value.clone())
    }
}

/// The aggregated availability list behind a TTL.
pub struct AvailabilityCache {
    cache: TtlCache<Vec<AggregatedInterval>>,
    aggregator: Aggregator,
    clock: Clock,
}

impl AvailabilityCache {
    pub fn new(aggregator: Aggregator, ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
            aggregator,
            clock: system_clock(),
        }
    }

    /// Builder: use `clock` for "today".
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Current unavailable intervals, sorted.
    pub async fn get(&self) -> StoreResult<Vec<AggregatedInterval>> {
        let now = (self.clock)();
        self.cache
            .get_or_compute(|| self.aggregator.aggregate(now))
            .await
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }

    pub async fn age(&self) -> Option<Duration> {
        self.cache.age().await
    }
}

/// Wraps a fetcher with one [`TtlCache`] per feed URL.
pub struct CachedFeedFetcher {
    inner: Arc<dyn FeedFetcher>,
    ttl: Duration,
    feeds: StdMutex<HashMap<String, Arc<TtlCache<String>>>>,
}

impl CachedFeedFetcher {
    pub fn new(inner: Arc<dyn FeedFetcher>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            feeds: StdMutex::new(HashMap::new()),
        }
    }

    /// Drops cached feeds whose URL is not in `urls`.
    pub fn retain_urls<'u>(&self, urls: impl IntoIterator<Item = &'u str>) {
        let keep: HashSet<&str> = urls.into_iter().collect();
        let Ok(mut feeds) = self.feeds.lock() else {
            warn!("Feed cache poisoned, skipping prune");
            return;
        };
        let before = feeds.len();
        feeds.retain(|url, _| keep.contains(url.as_str()));
        if feeds.len() < before {
            debug!(dropped = before - feeds.len(), "Pruned feed cache");
        }
    }

    fn entry(&self, url: &str) -> ProviderResult<Arc<TtlCache<String>>> {
        let mut feeds = self
            .feeds
            .lock()
            .map_err(|_| ProviderError::configuration("feed cache poisoned"))?;
        Ok(Arc::clone(
            feeds
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(TtlCache::new(self.ttl))),
        ))
    }
}

impl FeedFetcher for CachedFeedFetcher {
    fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            let entry = self.entry(url)?;
            entry.get_or_compute(|| self.inner.fetch_text(url)).await
        })
    }
}
