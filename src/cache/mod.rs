//! Two-tier refresh-ahead cache.
//!
//! - [`entry`]: TemporalEntry and its staleness predicates
//! - [`expiry`]: near tier TTL derived from an entry's own expiration
//! - [`key`]: cache key to remote store key mapping
//! - [`loader`]: RefreshAheadLoader, the far tier read path
//! - [`near`]: moka-backed near tier wired to the loader
//! - [`stats`]: hit/miss/load counters

pub mod entry;
pub mod expiry;
pub mod key;
pub mod loader;
pub mod near;
pub mod stats;
