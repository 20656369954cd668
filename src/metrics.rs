//! Prometheus export of loader statistics.
//!
//! [`PrometheusStatsCounter`] keeps the in-memory counters as the source of
//! truth for [`StatsCounter::snapshot`] and mirrors every event into Prometheus
//! counters and gauges registered under a common prefix.

use std::time::Duration;

use prometheus::{Encoder, Gauge, IntCounter, Opts, Registry, TextEncoder};
use thiserror::Error;

use crate::cache::stats::{AtomicStatsCounter, CacheStats, StatsCounter};

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Metrics text was not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Stats counter that also publishes to a Prometheus registry.
pub struct PrometheusStatsCounter {
    inner: AtomicStatsCounter,
    hits: IntCounter,
    misses: IntCounter,
    refreshes_scheduled: IntCounter,
    load_successes: IntCounter,
    load_failures: IntCounter,
    store_errors: IntCounter,
    evictions: IntCounter,
    hit_ratio: Gauge,
    miss_ratio: Gauge,
    load_success_time_ms: Gauge,
    load_failure_time_ms: Gauge,
}

impl PrometheusStatsCounter {
    /// Register all metrics under `prefix` in `registry`.
    ///
    /// Fails if the prefix is not a valid metric name or the names are already
    /// registered.
    pub fn register(registry: &Registry, prefix: &str) -> Result<Self, MetricsError> {
        let counter = |suffix: &str, help: &str| -> Result<IntCounter, MetricsError> {
            let c = IntCounter::with_opts(Opts::new(format!("{prefix}_{suffix}"), help))?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };
        let gauge = |suffix: &str, help: &str| -> Result<Gauge, MetricsError> {
            let g = Gauge::with_opts(Opts::new(format!("{prefix}_{suffix}"), help))?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };

        Ok(Self {
            inner: AtomicStatsCounter::new(),
            hits: counter("hits_total", "Remote entries served")?,
            misses: counter("misses_total", "Loads that required a source fetch")?,
            refreshes_scheduled: counter(
                "refresh_scheduled_total",
                "Background refreshes submitted",
            )?,
            load_successes: counter("load_success_total", "Source fetches that returned a value")?,
            load_failures: counter(
                "load_failure_total",
                "Source fetches that errored or returned nothing",
            )?,
            store_errors: counter("store_errors_total", "Remote store errors and timeouts")?,
            evictions: counter("evictions_total", "Local entries evicted for size or expiry")?,
            hit_ratio: gauge("hit_ratio", "Hits over requests")?,
            miss_ratio: gauge("miss_ratio", "Misses over requests")?,
            load_success_time_ms: gauge(
                "load_success_time_ms",
                "Duration of the last successful source fetch",
            )?,
            load_failure_time_ms: gauge(
                "load_failure_time_ms",
                "Duration of the last failed source fetch",
            )?,
        })
    }

    fn record_ratios(&self) {
        let snapshot = self.inner.snapshot();
        self.hit_ratio.set(snapshot.hit_rate());
        self.miss_ratio.set(snapshot.miss_rate());
    }
}

impl StatsCounter for PrometheusStatsCounter {
    fn record_hits(&self, count: u64) {
        self.inner.record_hits(count);
        self.hits.inc_by(count);
        self.record_ratios();
    }

    fn record_misses(&self, count: u64) {
        self.inner.record_misses(count);
        self.misses.inc_by(count);
        self.record_ratios();
    }

    fn record_refresh_scheduled(&self) {
        self.inner.record_refresh_scheduled();
        self.refreshes_scheduled.inc();
    }

    fn record_load_success(&self, elapsed: Duration) {
        self.inner.record_load_success(elapsed);
        self.load_successes.inc();
        self.load_success_time_ms.set(elapsed.as_micros() as f64 / 1000.0);
    }

    fn record_load_failure(&self, elapsed: Duration) {
        self.inner.record_load_failure(elapsed);
        self.load_failures.inc();
        self.load_failure_time_ms.set(elapsed.as_micros() as f64 / 1000.0);
    }

    fn record_store_error(&self) {
        self.inner.record_store_error();
        self.store_errors.inc();
    }

    fn record_evictions(&self, count: u64) {
        self.inner.record_evictions(count);
        self.evictions.inc_by(count);
    }

    fn snapshot(&self) -> CacheStats {
        self.inner.snapshot()
    }
}

/// Render a registry in the Prometheus text exposition format.
pub fn render(registry: &Registry) -> Result<String, MetricsError> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_reach_registry() {
        let registry = Registry::new();
        let stats = PrometheusStatsCounter::register(&registry, "products_cache").unwrap();

        stats.record_hits(3);
        stats.record_misses(1);
        stats.record_load_success(Duration::from_millis(12));
        stats.record_evictions(4);

        let text = render(&registry).unwrap();
        assert!(text.contains("products_cache_hits_total 3"));
        assert!(text.contains("products_cache_misses_total 1"));
        assert!(text.contains("products_cache_hit_ratio 0.75"));
        assert!(text.contains("products_cache_load_success_time_ms 12"));
        assert!(text.contains("products_cache_evictions_total 4"));
        assert_eq!(stats.snapshot().hits, 3);
    }

    #[test]
    fn test_duplicate_prefix_is_rejected() {
        let registry = Registry::new();
        PrometheusStatsCounter::register(&registry, "dup").unwrap();
        assert!(PrometheusStatsCounter::register(&registry, "dup").is_err());
    }

    #[test]
    fn test_invalid_prefix_is_rejected() {
        let registry = Registry::new();
        assert!(PrometheusStatsCounter::register(&registry, "has-dash").is_err());
    }
}
