//! Loader statistics.
//!
//! For the loader a hit is a remote entry that was served (fresh or
//! refresh-eligible) and a miss is anything that forced a synchronous fetch:
//! absent, expired, undecodable, or a store that errored or timed out. The
//! near tier records its local hits, misses and evictions the same way.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub refreshes_scheduled: u64,
    pub load_successes: u64,
    pub load_failures: u64,
    pub store_errors: u64,
    pub evictions: u64,
    pub total_load_time: Duration,
}

impl CacheStats {
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of requests served from the remote tier; 1.0 when idle.
    pub fn hit_rate(&self) -> f64 {
        let requests = self.requests();
        if requests == 0 {
            1.0
        } else {
            self.hits as f64 / requests as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        let requests = self.requests();
        if requests == 0 {
            0.0
        } else {
            self.misses as f64 / requests as f64
        }
    }

    /// Mean time spent per source fetch.
    pub fn average_load_penalty(&self) -> Duration {
        let loads = self.load_successes + self.load_failures;
        if loads == 0 {
            return Duration::ZERO;
        }
        let loads = u32::try_from(loads).unwrap_or(u32::MAX);
        self.total_load_time / loads
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hits={} misses={} hit_rate={:.3} refreshes={} loads_ok={} loads_failed={} store_errors={} evictions={} avg_load={:?}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.refreshes_scheduled,
            self.load_successes,
            self.load_failures,
            self.store_errors,
            self.evictions,
            self.average_load_penalty(),
        )
    }
}

/// Sink for cache events.
pub trait StatsCounter: Send + Sync {
    fn record_hits(&self, count: u64);
    fn record_misses(&self, count: u64);
    fn record_refresh_scheduled(&self);
    fn record_load_success(&self, elapsed: Duration);
    fn record_load_failure(&self, elapsed: Duration);
    fn record_store_error(&self);
    /// Entries dropped for size or expiry, not explicit removal.
    fn record_evictions(&self, count: u64);
    fn snapshot(&self) -> CacheStats;
}

pub type SharedStats = Arc<dyn StatsCounter>;

/// Lock-free in-memory counters.
#[derive(Debug, Default)]
pub struct AtomicStatsCounter {
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes_scheduled: AtomicU64,
    load_successes: AtomicU64,
    load_failures: AtomicU64,
    store_errors: AtomicU64,
    evictions: AtomicU64,
    total_load_nanos: AtomicU64,
}

impl AtomicStatsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_load_time(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_load_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

impl StatsCounter for AtomicStatsCounter {
    fn record_hits(&self, count: u64) {
        self.hits.fetch_add(count, Ordering::Relaxed);
    }

    fn record_misses(&self, count: u64) {
        self.misses.fetch_add(count, Ordering::Relaxed);
    }

    fn record_refresh_scheduled(&self) {
        self.refreshes_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    fn record_load_success(&self, elapsed: Duration) {
        self.load_successes.fetch_add(1, Ordering::Relaxed);
        self.add_load_time(elapsed);
    }

    fn record_load_failure(&self, elapsed: Duration) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
        self.add_load_time(elapsed);
    }

    fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refreshes_scheduled: self.refreshes_scheduled.load(Ordering::Relaxed),
            load_successes: self.load_successes.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            total_load_time: Duration::from_nanos(self.total_load_nanos.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = AtomicStatsCounter::new();
        stats.record_hits(3);
        stats.record_misses(1);
        stats.record_refresh_scheduled();
        stats.record_load_success(Duration::from_millis(30));
        stats.record_load_failure(Duration::from_millis(10));
        stats.record_evictions(2);

        let snap = stats.snapshot();
        assert_eq!(snap.hits, 3);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.refreshes_scheduled, 1);
        assert_eq!(snap.evictions, 2);
        assert_eq!(snap.requests(), 4);
        assert!((snap.hit_rate() - 0.75).abs() < 1e-10);
        assert!((snap.miss_rate() - 0.25).abs() < 1e-10);
        assert_eq!(snap.average_load_penalty(), Duration::from_millis(20));
    }

    #[test]
    fn test_idle_rates() {
        let snap = CacheStats::default();
        assert_eq!(snap.hit_rate(), 1.0);
        assert_eq!(snap.miss_rate(), 0.0);
        assert_eq!(snap.average_load_penalty(), Duration::ZERO);
    }
}
