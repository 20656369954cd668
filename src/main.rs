//! refresh-ahead simulation.
//!
//! Drives a near tier + remote store + slow source through a number of rounds
//! and reports how often readers had to wait on the source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clap::Parser;
use prometheus::Registry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use refresh_ahead::config::{Cli, Config};
use refresh_ahead::metrics::{render, PrometheusStatsCounter};
use refresh_ahead::store::memory::MemoryStore;
use refresh_ahead::{NearCache, RefreshAheadLoader, Source};

/// Value produced by the simulated source.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Quote {
    symbol: String,
    version: u64,
}

struct SlowSource {
    latency: Duration,
    fetches: AtomicU64,
}

#[async_trait]
impl Source<String, Quote> for SlowSource {
    async fn fetch(&self, key: &String) -> anyhow::Result<Option<Quote>> {
        tokio::time::sleep(self.latency).await;
        let version = self.fetches.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Some(Quote {
            symbol: key.clone(),
            version,
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "refresh_ahead=debug"
    } else {
        "refresh_ahead=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("refresh-ahead v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&cli.config)?;
    info!(
        expire_after_secs = config.policy.expire_after_secs,
        refresh_after_secs = config.policy.refresh_after_secs,
        workers = config.refresh.workers,
        get_timeout_ms = config.store.get_timeout_ms,
        near = config.near.enabled,
        "Configuration loaded"
    );

    let registry = Registry::new();
    let remote_stats = Arc::new(PrometheusStatsCounter::register(
        &registry,
        "refresh_ahead_remote",
    )?);
    let near_stats = Arc::new(PrometheusStatsCounter::register(&registry, "refresh_ahead")?);

    let source = SlowSource {
        latency: Duration::from_millis(cli.source_latency_ms),
        fetches: AtomicU64::new(0),
    };
    let loader: RefreshAheadLoader<String, Quote> =
        RefreshAheadLoader::builder(source, MemoryStore::new())
            .config(&config)
            .stats(remote_stats)
            .build();
    let near = config
        .near
        .enabled
        .then(|| NearCache::with_stats(loader.clone(), &config.near, near_stats));

    let keys: Vec<String> = (0..cli.keys).map(|i| format!("SYM{i:03}")).collect();
    let mut slowest = Duration::ZERO;

    for round in 0..cli.rounds {
        let started = Instant::now();
        for key in &keys {
            let call = Instant::now();
            let entry = match &near {
                Some(near) => near.get(key).await,
                None => loader.load(key).await,
            };
            slowest = slowest.max(call.elapsed());
            if let Some(quote) = entry.as_ref().and_then(|e| e.value()) {
                debug!(key = %key, version = quote.version, "Loaded");
            }
        }
        info!(
            round,
            elapsed_ms = started.elapsed().as_millis() as u64,
            pending_refreshes = loader.pool().pending(),
            "Round complete"
        );
        tokio::time::sleep(Duration::from_millis(cli.interval_ms)).await;
    }

    loader.shutdown().await;

    if let Some(near) = &near {
        info!(snapshot = %near.stats(), "Near tier");
    }
    info!(
        snapshot = %loader.stats(),
        slowest_read_ms = slowest.as_millis() as u64,
        "Simulation finished"
    );
    println!("{}", render(&registry)?);

    Ok(())
}
