//! In-process remote store.
//!
//! Stands in for memcached/redis in tests and in the simulation binary. It can
//! be told to fail or stall so degraded-tier behavior can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::store::{RemoteStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStoreStats {
    pub gets: AtomicU64,
    pub sets: AtomicU64,
}

/// A `HashMap` behind a lock, with fault injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, Vec<u8>>>,
    fail_gets: AtomicBool,
    fail_sets: AtomicBool,
    get_delay_ms: AtomicU64,
    stats: MemoryStoreStats,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `get` return [`StoreError::Unavailable`].
    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    /// Make every `set` return [`StoreError::Unavailable`].
    pub fn fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }

    /// Delay every `get` by `delay`.
    pub fn delay_gets(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.get_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Write raw bytes, bypassing fault injection and counters.
    pub async fn put_raw(&self, key: &str, value: Vec<u8>) {
        self.items.write().await.insert(key.to_string(), value);
    }

    /// Read raw bytes, bypassing fault injection and counters.
    pub async fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.items.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    pub fn stats(&self) -> &MemoryStoreStats {
        &self.stats
    }

    pub fn get_count(&self) -> u64 {
        self.stats.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> u64 {
        self.stats.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.stats.gets.fetch_add(1, Ordering::SeqCst);

        let delay = self.get_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected get failure".into()));
        }

        let value = self.items.read().await.get(key).cloned();
        debug!(key, hit = value.is_some(), "Memory store get");
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.stats.sets.fetch_add(1, Ordering::SeqCst);

        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected set failure".into()));
        }

        debug!(key, size = value.len(), "Memory store set");
        self.items.write().await.insert(key.to_string(), value);
        Ok(())
    }
}
