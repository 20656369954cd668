//! In-process near tier in front of the loader.
//!
//! Entries live locally until the `expires_at` they carry (see
//! [`EntryExpiry`]). Concurrent misses for one key share a single
//! `loader.load`. A local hit that has become refresh-eligible triggers one
//! background reload per key: the remote tier is consulted first, so an entry
//! another process already refreshed is adopted without a source fetch. The
//! result replaces the local entry, which resets the local timer to the new
//! expiration.
//!
//! The near tier keeps its own [`StatsCounter`](crate::cache::stats::StatsCounter): hits and misses here are
//! local ones, and size or expiry evictions are counted too. The loader's
//! counter still sees remote hits and misses for every local miss.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use moka::future::Cache;
use moka::notification::RemovalCause;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::entry::{Freshness, TemporalEntry};
use crate::cache::expiry::EntryExpiry;
use crate::cache::loader::RefreshAheadLoader;
use crate::cache::stats::{AtomicStatsCounter, CacheStats, SharedStats};
use crate::clock::SharedClock;
use crate::config::NearConfig;
use crate::refresh::Submission;

/// Keys with a local refresh in flight, each tagged with the refresh that owns it.
type Refreshing<K> = Arc<Mutex<HashMap<K, u64>>>;

/// Local tier backed by a [`RefreshAheadLoader`].
pub struct NearCache<K, V> {
    cache: Cache<K, TemporalEntry<V>>,
    loader: RefreshAheadLoader<K, V>,
    clock: SharedClock,
    stats: SharedStats,
    refreshing: Refreshing<K>,
    next_token: AtomicU64,
}

impl<K, V> NearCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(loader: RefreshAheadLoader<K, V>, config: &NearConfig) -> Self {
        Self::with_stats(loader, config, Arc::new(AtomicStatsCounter::new()))
    }

    /// Record local hits, misses and evictions into `stats`.
    pub fn with_stats(
        loader: RefreshAheadLoader<K, V>,
        config: &NearConfig,
        stats: SharedStats,
    ) -> Self {
        let clock = loader.clock();
        let evictions = stats.clone();
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(EntryExpiry::new(clock.clone()))
            .eviction_listener(move |_key, _entry, cause: RemovalCause| {
                if cause.was_evicted() {
                    evictions.record_evictions(1);
                }
            })
            .build();

        Self {
            cache,
            loader,
            clock,
            stats,
            refreshing: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
        }
    }

    /// Local entry if still usable, otherwise whatever the loader produces.
    pub async fn get(&self, key: &K) -> Option<TemporalEntry<V>> {
        if let Some(entry) = self.cache.get(key).await {
            match entry.freshness(self.clock.now()) {
                Freshness::Fresh => {
                    self.stats.record_hits(1);
                    return Some(entry);
                }
                Freshness::RefreshEligible => {
                    self.stats.record_hits(1);
                    self.schedule_refresh(key.clone(), entry.clone());
                    return Some(entry);
                }
                // The local timer runs on moka's clock; catch anything it has
                // not evicted yet.
                Freshness::Expired => self.cache.invalidate(key).await,
            }
        }

        self.stats.record_misses(1);
        let loader = self.loader.clone();
        let owned = key.clone();
        self.cache
            .optionally_get_with(key.clone(), async move { loader.load(&owned).await })
            .await
    }

    /// Drop the local entry. A refresh already in flight for `key` will not
    /// bring it back.
    pub async fn invalidate(&self, key: &K) {
        lock(&self.refreshing).remove(key);
        self.cache.invalidate(key).await;
    }

    /// Approximate number of local entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Apply pending inserts and evictions so counts are exact.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub fn loader(&self) -> &RefreshAheadLoader<K, V> {
        &self.loader
    }

    /// Local tier counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Whether a local refresh for `key` is queued or running.
    pub fn is_refreshing(&self, key: &K) -> bool {
        lock(&self.refreshing).contains_key(key)
    }

    fn schedule_refresh(&self, key: K, current: TemporalEntry<V>) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut refreshing = lock(&self.refreshing);
            if refreshing.contains_key(&key) {
                return;
            }
            refreshing.insert(key.clone(), token);
        }

        let loader = self.loader.clone();
        let cache = self.cache.clone();
        let refreshing = self.refreshing.clone();
        let owned = key.clone();
        let job = async move {
            let reloaded = loader.reload(&owned, &current).await;
            let still_owned = || lock(&refreshing).get(&owned) == Some(&token);

            match reloaded {
                Some(entry) if still_owned() => {
                    cache.insert(owned.clone(), entry).await;
                    if !still_owned() {
                        // Invalidated while the insert was in progress.
                        cache.invalidate(&owned).await;
                        return;
                    }
                    debug!("Near entry refreshed");
                }
                Some(_) => {
                    debug!("Near entry invalidated during refresh, discarding result");
                    return;
                }
                None => debug!("Near refresh produced no value, keeping local entry"),
            }

            let mut guard = lock(&refreshing);
            if guard.get(&owned) == Some(&token) {
                guard.remove(&owned);
            }
        }
        .boxed();

        match self.loader.pool().submit(job) {
            Ok(Submission::Queued | Submission::Parked) => self.stats.record_refresh_scheduled(),
            Ok(Submission::Collapsed) => {}
            Err(e) => {
                warn!(error = %e, "Could not schedule near refresh");
                lock(&self.refreshing).remove(&key);
            }
        }
    }
}

fn lock<K>(refreshing: &Mutex<HashMap<K, u64>>) -> MutexGuard<'_, HashMap<K, u64>> {
    refreshing
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
