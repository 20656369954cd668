//! Refresh-ahead loader: the far tier read path.
//!
//! For every request the loader reads the remote entry and decides:
//!
//! | remote entry                   | action                                        |
//! |--------------------------------|-----------------------------------------------|
//! | absent, expired, unreadable    | fetch from source, store, return new entry    |
//! | unexpired, refresh-eligible    | return it, refresh in the background          |
//! | unexpired, not eligible        | return it                                     |
//!
//! Remote store trouble never reaches the caller: a get that errors, times out,
//! or returns undecodable bytes is a miss, and a failed write still returns the
//! freshly fetched entry. Nothing is written when the source has no value.
//!
//! Background refreshes are keyed by store key on the pool, so a key has at
//! most one refresh waiting. One that is already running does not block a new
//! one: concurrent refreshes write equivalent entries and the last write wins.

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::entry::{Freshness, TemporalEntry};
use crate::cache::key::{DisplayKeyScheme, HashingKeyScheme, KeyScheme};
use crate::cache::stats::{AtomicStatsCounter, CacheStats, SharedStats};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{Config, RefreshConfig, StoreConfig};
use crate::refresh::{RefreshPool, Submission};
use crate::source::{FixedPolicy, FreshnessPolicy, Source};
use crate::store::codec::EntryCodec;
use crate::store::RemoteStore;

/// What a single load did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome<V> {
    /// Served from the remote tier, no refresh needed.
    Fresh(TemporalEntry<V>),
    /// Served from the remote tier, background refresh scheduled.
    Refreshing(TemporalEntry<V>),
    /// Fetched synchronously from the source.
    Fetched(TemporalEntry<V>),
    /// The source had no value.
    NotFound,
    /// The source fetch failed.
    Failed,
}

impl<V> LoadOutcome<V> {
    pub fn entry(&self) -> Option<&TemporalEntry<V>> {
        match self {
            LoadOutcome::Fresh(e) | LoadOutcome::Refreshing(e) | LoadOutcome::Fetched(e) => Some(e),
            LoadOutcome::NotFound | LoadOutcome::Failed => None,
        }
    }

    pub fn into_entry(self) -> Option<TemporalEntry<V>> {
        match self {
            LoadOutcome::Fresh(e) | LoadOutcome::Refreshing(e) | LoadOutcome::Fetched(e) => Some(e),
            LoadOutcome::NotFound | LoadOutcome::Failed => None,
        }
    }

    /// Whether the entry came from the remote tier.
    pub fn is_hit(&self) -> bool {
        matches!(self, LoadOutcome::Fresh(_) | LoadOutcome::Refreshing(_))
    }
}

struct LoaderInner<K, V> {
    source: Arc<dyn Source<K, V>>,
    policy: Arc<dyn FreshnessPolicy<V>>,
    store: Arc<dyn RemoteStore>,
    key_scheme: Arc<dyn KeyScheme<K>>,
    codec: EntryCodec,
    clock: SharedClock,
    stats: SharedStats,
    pool: Arc<RefreshPool>,
    get_timeout: Duration,
}

/// Loads entries through the remote tier, refreshing them ahead of expiry.
///
/// Cheap to clone; clones share the pool, stats and collaborators.
pub struct RefreshAheadLoader<K, V> {
    inner: Arc<LoaderInner<K, V>>,
}

impl<K, V> Clone for RefreshAheadLoader<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> RefreshAheadLoader<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn builder(
        source: impl Source<K, V> + 'static,
        store: impl RemoteStore + 'static,
    ) -> LoaderBuilder<K, V> {
        LoaderBuilder::new(Arc::new(source), Arc::new(store))
    }

    /// Load the entry for `key`, or `None` if the source has nothing or failed.
    pub async fn load(&self, key: &K) -> Option<TemporalEntry<V>> {
        self.load_outcome(key).await.into_entry()
    }

    /// Load the entry for `key`, reporting which path served it.
    pub async fn load_outcome(&self, key: &K) -> LoadOutcome<V> {
        let inner = &self.inner;
        let store_key = inner.key_scheme.store_key(key);

        if let Some(entry) = inner.read_remote(&store_key).await {
            let now = inner.clock.now();
            match entry.freshness(now) {
                Freshness::Fresh => {
                    inner.stats.record_hits(1);
                    debug!(key = %store_key, "Serving fresh entry");
                    return LoadOutcome::Fresh(entry);
                }
                Freshness::RefreshEligible => {
                    inner.stats.record_hits(1);
                    debug!(key = %store_key, "Serving entry, refreshing in background");
                    self.schedule_refresh(key.clone(), store_key);
                    return LoadOutcome::Refreshing(entry);
                }
                Freshness::Expired => {
                    debug!(key = %store_key, expires_at = %entry.expires_at(), "Cached entry expired");
                }
            }
        }

        inner.stats.record_misses(1);
        inner.fetch_and_save(key, &store_key).await
    }

    /// Fetch from the source and store the result now, regardless of what the
    /// remote tier holds.
    pub async fn refresh(&self, key: &K) -> Option<TemporalEntry<V>> {
        let store_key = self.inner.key_scheme.store_key(key);
        self.inner.fetch_and_save(key, &store_key).await.into_entry()
    }

    /// Replace `current`, an entry held elsewhere that has become
    /// refresh-eligible.
    ///
    /// If the remote tier already holds a newer unexpired entry (another
    /// process refreshed it) that entry is returned without touching the
    /// source. Otherwise this is [`RefreshAheadLoader::refresh`].
    pub async fn reload(&self, key: &K, current: &TemporalEntry<V>) -> Option<TemporalEntry<V>> {
        let inner = &self.inner;
        let store_key = inner.key_scheme.store_key(key);

        if let Some(remote) = inner.read_remote(&store_key).await {
            if remote.refresh_eligible_at() > current.refresh_eligible_at()
                && !remote.is_expired(inner.clock.now())
            {
                debug!(key = %store_key, expires_at = %remote.expires_at(), "Adopting newer remote entry");
                return Some(remote);
            }
        }

        inner.fetch_and_save(key, &store_key).await.into_entry()
    }

    fn schedule_refresh(&self, key: K, store_key: String) {
        let inner = self.inner.clone();
        let job_key = store_key.clone();
        let job = async move {
            match inner.fetch_and_save(&key, &store_key).await {
                LoadOutcome::Fetched(entry) => {
                    debug!(key = %store_key, expires_at = %entry.expires_at(), "Background refresh stored");
                }
                _ => {
                    debug!(key = %store_key, "Background refresh produced no value");
                }
            }
        }
        .boxed();

        match self.inner.pool.submit_keyed(job_key, job) {
            Ok(Submission::Queued | Submission::Parked) => self.inner.stats.record_refresh_scheduled(),
            Ok(Submission::Collapsed) => {}
            Err(e) => warn!(error = %e, "Could not schedule background refresh"),
        }
    }

    /// The derived remote store key for `key`.
    pub fn store_key(&self, key: &K) -> String {
        self.inner.key_scheme.store_key(key)
    }

    pub fn pool(&self) -> &RefreshPool {
        &self.inner.pool
    }

    /// Shared handle to the pool, for submitting related background work.
    pub fn shared_pool(&self) -> Arc<RefreshPool> {
        self.inner.pool.clone()
    }

    pub fn clock(&self) -> SharedClock {
        self.inner.clock.clone()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Drain background refreshes and stop the pool. A pool shared with other
    /// loaders stops for them too.
    pub async fn shutdown(&self) {
        self.inner.pool.shutdown().await;
    }
}

impl<K, V> LoaderInner<K, V>
where
    K: Send + Sync,
    V: Serialize + DeserializeOwned + Send + Sync,
{
    async fn read_remote(&self, store_key: &str) -> Option<TemporalEntry<V>> {
        let bytes = match tokio::time::timeout(self.get_timeout, self.store.get(store_key)).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                self.stats.record_store_error();
                warn!(key = %store_key, error = %e, "Remote store get failed");
                return None;
            }
            Err(_) => {
                self.stats.record_store_error();
                warn!(key = %store_key, timeout = ?self.get_timeout, "Remote store get timed out");
                return None;
            }
        };

        match self.codec.decode(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = %store_key, error = %e, "Discarding undecodable entry");
                None
            }
        }
    }

    async fn fetch_and_save(&self, key: &K, store_key: &str) -> LoadOutcome<V> {
        let started = Instant::now();
        let fetched = self.source.fetch(key).await;
        let elapsed = started.elapsed();

        let value = match fetched {
            Ok(Some(value)) => value,
            Ok(None) => {
                self.stats.record_load_failure(elapsed);
                debug!(key = %store_key, "Source has no value");
                return LoadOutcome::NotFound;
            }
            Err(e) => {
                self.stats.record_load_failure(elapsed);
                warn!(key = %store_key, error = %e, "Source fetch failed");
                return LoadOutcome::Failed;
            }
        };
        self.stats.record_load_success(elapsed);

        let expiration = self.policy.expiration(&value);
        let refresh_eligible = self.policy.refresh_eligible(&value);
        let entry = TemporalEntry::new(value, expiration, refresh_eligible, self.clock.now());

        self.write_remote(store_key, &entry).await;
        LoadOutcome::Fetched(entry)
    }

    async fn write_remote(&self, store_key: &str, entry: &TemporalEntry<V>) {
        let bytes = match self.codec.encode(entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %store_key, error = %e, "Could not encode entry");
                return;
            }
        };

        if let Err(e) = self.store.set(store_key, bytes).await {
            self.stats.record_store_error();
            warn!(key = %store_key, error = %e, "Remote store set failed");
        }
    }
}

/// Assembles a [`RefreshAheadLoader`].
pub struct LoaderBuilder<K, V> {
    source: Arc<dyn Source<K, V>>,
    store: Arc<dyn RemoteStore>,
    policy: Arc<dyn FreshnessPolicy<V>>,
    key_scheme: Option<Arc<dyn KeyScheme<K>>>,
    clock: SharedClock,
    stats: SharedStats,
    pool: Option<Arc<RefreshPool>>,
    store_config: StoreConfig,
    refresh_config: RefreshConfig,
}

impl<K, V> LoaderBuilder<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(source: Arc<dyn Source<K, V>>, store: Arc<dyn RemoteStore>) -> Self {
        Self {
            source,
            store,
            policy: Arc::new(FixedPolicy::default()),
            key_scheme: None,
            clock: Arc::new(SystemClock),
            stats: Arc::new(AtomicStatsCounter::new()),
            pool: None,
            store_config: StoreConfig::default(),
            refresh_config: RefreshConfig::default(),
        }
    }

    /// Take store, pool and policy settings from `config`.
    pub fn config(mut self, config: &Config) -> Self {
        self.store_config = config.store.clone();
        self.refresh_config = config.refresh.clone();
        self.policy = Arc::new(config.policy.fixed_policy());
        self
    }

    pub fn policy(mut self, policy: impl FreshnessPolicy<V> + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn key_scheme(mut self, scheme: impl KeyScheme<K> + 'static) -> Self {
        self.key_scheme = Some(Arc::new(scheme));
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    /// Run background refreshes on an existing pool instead of starting one.
    /// `refresh_config` is then ignored.
    pub fn pool(mut self, pool: Arc<RefreshPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn store_config(mut self, config: StoreConfig) -> Self {
        self.store_config = config;
        self
    }

    pub fn refresh_config(mut self, config: RefreshConfig) -> Self {
        self.refresh_config = config;
        self
    }

    /// Build with the configured key scheme. Keys without a `Display` form must
    /// set one with [`LoaderBuilder::key_scheme`]; use
    /// [`LoaderBuilder::build_with_keys`] for those.
    ///
    /// Without a pool from [`LoaderBuilder::pool`] this starts one, which must
    /// happen inside a tokio runtime.
    pub fn build(self) -> RefreshAheadLoader<K, V>
    where
        K: Display,
    {
        let scheme = match self.key_scheme.clone() {
            Some(scheme) => scheme,
            None => default_scheme::<K>(&self.store_config),
        };
        self.finish(scheme)
    }

    /// Build using `scheme` for store keys.
    pub fn build_with_keys(self, scheme: impl KeyScheme<K> + 'static) -> RefreshAheadLoader<K, V> {
        self.finish(Arc::new(scheme))
    }

    fn finish(self, key_scheme: Arc<dyn KeyScheme<K>>) -> RefreshAheadLoader<K, V> {
        let pool = match self.pool {
            Some(pool) => pool,
            None => Arc::new(RefreshPool::new(&self.refresh_config)),
        };
        RefreshAheadLoader {
            inner: Arc::new(LoaderInner {
                source: self.source,
                policy: self.policy,
                store: self.store,
                key_scheme,
                codec: EntryCodec::from_config(&self.store_config),
                clock: self.clock,
                stats: self.stats,
                pool,
                get_timeout: self.store_config.get_timeout(),
            }),
        }
    }
}

fn default_scheme<K: Display + 'static>(config: &StoreConfig) -> Arc<dyn KeyScheme<K>> {
    let namespace = config.namespace.clone();
    match (config.hash_keys, namespace) {
        (true, ns) => Arc::new(HashingKeyScheme::<K>::new(ns.unwrap_or_default())),
        (false, Some(ns)) => Arc::new(DisplayKeyScheme::with_namespace(ns)),
        (false, None) => Arc::new(DisplayKeyScheme::new()),
    }
}
