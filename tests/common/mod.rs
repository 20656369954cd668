//! Shared test doubles.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use refresh_ahead::config::{RefreshConfig, StoreConfig};
use refresh_ahead::store::codec::EntryCodec;
use refresh_ahead::store::memory::MemoryStore;
use refresh_ahead::{FixedPolicy, ManualClock, RefreshAheadLoader, Source, TemporalEntry};

/// What the scripted source answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Value,
    Missing,
    Error,
}

/// Source returning `"<key>@v<n>"`, where `n` counts fetches.
#[derive(Debug)]
pub struct ScriptedSource {
    fetches: AtomicUsize,
    latency_ms: AtomicU64,
    mode: Mutex<Mode>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fetches: AtomicUsize::new(0),
            latency_ms: AtomicU64::new(0),
            mode: Mutex::new(Mode::Value),
        })
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        let source = Self::new();
        source.set_latency(latency);
        source
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source<String, String> for ScriptedSource {
    async fn fetch(&self, key: &String) -> anyhow::Result<Option<String>> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let mode = *self.mode.lock().unwrap();
        match mode {
            Mode::Value => Ok(Some(format!("{key}@v{n}"))),
            Mode::Missing => Ok(None),
            Mode::Error => Err(anyhow!("source unavailable")),
        }
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Everything a loader test needs a handle on.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub source: Arc<ScriptedSource>,
    pub store: Arc<MemoryStore>,
    pub loader: RefreshAheadLoader<String, String>,
}

impl Harness {
    /// Loader with a 60s expiration and 30s refresh window, clock at [`t0`].
    pub fn new() -> Self {
        Self::with(FixedPolicy::new(secs(60), secs(30)), RefreshConfig::default())
    }

    pub fn with(policy: FixedPolicy, refresh: RefreshConfig) -> Self {
        Self::with_source(ScriptedSource::new(), policy, refresh, StoreConfig::default())
    }

    pub fn with_source(
        source: Arc<ScriptedSource>,
        policy: FixedPolicy,
        refresh: RefreshConfig,
        store_config: StoreConfig,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(MemoryStore::new());
        let loader = RefreshAheadLoader::builder(source.clone(), store.clone())
            .clock(clock.clone())
            .policy(policy)
            .refresh_config(refresh)
            .store_config(store_config)
            .build();
        Self {
            clock,
            source,
            store,
            loader,
        }
    }

    /// Another loader on the same store, source and clock, as a second
    /// process sharing the remote tier would have.
    pub fn peer_loader(&self) -> RefreshAheadLoader<String, String> {
        RefreshAheadLoader::builder(self.source.clone(), self.store.clone())
            .clock(self.clock.clone())
            .policy(FixedPolicy::new(secs(60), secs(30)))
            .build()
    }

    /// Write an entry created at `created` with the harness' 60s/30s windows.
    pub async fn seed(&self, key: &str, value: &str, created: DateTime<Utc>) -> TemporalEntry<String> {
        let entry = TemporalEntry::new(value.to_string(), secs(60), secs(30), created);
        let bytes = EntryCodec::default().encode(&entry).unwrap();
        self.store.put_raw(key, bytes).await;
        entry
    }

    /// Decode whatever the store holds under `key`.
    pub async fn stored(&self, key: &str) -> Option<TemporalEntry<String>> {
        let bytes = self.store.get_raw(key).await?;
        Some(EntryCodec::default().decode(&bytes).unwrap())
    }
}
