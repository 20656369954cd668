//! The system of record behind the cache, and the policy for how long its
//! values stay fresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Fetches authoritative values on a cache miss or refresh.
///
/// `Ok(None)` means the source has nothing for the key. Errors are logged by
/// the loader and treated the same as `Ok(None)` by callers of `load`.
#[async_trait]
pub trait Source<K, V>: Send + Sync {
    async fn fetch(&self, key: &K) -> anyhow::Result<Option<V>>;
}

#[async_trait]
impl<K, V, S> Source<K, V> for Arc<S>
where
    K: Send + Sync,
    V: Send,
    S: Source<K, V> + ?Sized,
{
    async fn fetch(&self, key: &K) -> anyhow::Result<Option<V>> {
        (**self).fetch(key).await
    }
}

/// Decides expiration and refresh-eligibility windows for a fetched value.
pub trait FreshnessPolicy<V>: Send + Sync {
    /// How long after fetching the value must stop being served.
    fn expiration(&self, value: &V) -> Duration;

    /// How long after fetching the value should be refreshed in the background.
    fn refresh_eligible(&self, value: &V) -> Duration;
}

/// The same windows for every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPolicy {
    pub expire_after: Duration,
    pub refresh_after: Duration,
}

impl FixedPolicy {
    pub fn new(expire_after: Duration, refresh_after: Duration) -> Self {
        Self {
            expire_after,
            refresh_after,
        }
    }
}

impl Default for FixedPolicy {
    fn default() -> Self {
        Self {
            expire_after: Duration::from_secs(60),
            refresh_after: Duration::from_secs(30),
        }
    }
}

impl<V> FreshnessPolicy<V> for FixedPolicy {
    fn expiration(&self, _value: &V) -> Duration {
        self.expire_after
    }

    fn refresh_eligible(&self, _value: &V) -> Duration {
        self.refresh_after
    }
}
