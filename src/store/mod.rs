//! The shared remote (far) tier.
//!
//! - [`codec`]: entry encoding, with zstd for large entries
//! - [`memory`]: in-process [`RemoteStore`] for tests and simulations
//!
//! Entries are written with no native TTL. Staleness lives in the entry itself,
//! so the store only has to hand back whatever bytes were last written.

pub mod codec;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Store rejected key {key}: {reason}")]
    Rejected { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A shared key/value store holding encoded entries.
///
/// Plain get/set, last writer wins. Implementations own their wire protocol,
/// pooling and retries.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: RemoteStore + ?Sized> RemoteStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }
}
