//! Mapping cache keys to remote store keys.

use std::fmt::Display;
use std::marker::PhantomData;

use xxhash_rust::xxh3::xxh3_64;

/// Derives the remote store key for a cache key.
pub trait KeyScheme<K>: Send + Sync {
    fn store_key(&self, key: &K) -> String;
}

impl<K, F> KeyScheme<K> for F
where
    F: Fn(&K) -> String + Send + Sync,
{
    fn store_key(&self, key: &K) -> String {
        self(key)
    }
}

/// Uses the key's `Display` form, optionally under a namespace.
///
/// Keys stay readable in the remote store, which makes it easy to inspect what
/// is cached.
#[derive(Debug, Clone, Default)]
pub struct DisplayKeyScheme {
    namespace: Option<String>,
}

impl DisplayKeyScheme {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
        }
    }
}

impl<K: Display> KeyScheme<K> for DisplayKeyScheme {
    fn store_key(&self, key: &K) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{key}"),
            None => key.to_string(),
        }
    }
}

/// Hashes the key's `Display` form with xxh3 into a fixed-width hex key.
///
/// For stores that limit key length or charset (memcached: 250 bytes, no
/// whitespace).
#[derive(Debug, Clone)]
pub struct HashingKeyScheme<K> {
    namespace: String,
    _key: PhantomData<fn(&K)>,
}

impl<K> HashingKeyScheme<K> {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            _key: PhantomData,
        }
    }
}

impl<K: Display> KeyScheme<K> for HashingKeyScheme<K> {
    fn store_key(&self, key: &K) -> String {
        let digest = xxh3_64(key.to_string().as_bytes());
        format!("{}:{digest:016x}", self.namespace)
    }
}
