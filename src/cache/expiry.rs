//! Near tier expiry driven by the entry's own expiration instant.
//!
//! The near tier must never keep an entry past the `expires_at` it carries, and
//! reading an entry must not move that deadline. Creation and replacement reset
//! the timer to whatever is left on the new entry; reads leave it alone.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moka::Expiry;

use crate::cache::entry::TemporalEntry;
use crate::clock::SharedClock;

/// Computes near tier time-to-live from [`TemporalEntry::expires_at`].
#[derive(Clone)]
pub struct EntryExpiry {
    clock: SharedClock,
}

impl EntryExpiry {
    pub fn new(clock: SharedClock) -> Self {
        Self { clock }
    }

    /// Retention for a newly created or replaced entry: `max(expires_at - now, 0)`.
    pub fn ttl_for<V>(entry: &TemporalEntry<V>, now: DateTime<Utc>) -> Duration {
        entry.remaining(now)
    }
}

impl std::fmt::Debug for EntryExpiry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryExpiry").finish_non_exhaustive()
    }
}

impl<K, V> Expiry<K, TemporalEntry<V>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &K,
        value: &TemporalEntry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(Self::ttl_for(value, self.clock.now()))
    }

    fn expire_after_update(
        &self,
        _key: &K,
        value: &TemporalEntry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(Self::ttl_for(value, self.clock.now()))
    }

    fn expire_after_read(
        &self,
        _key: &K,
        _value: &TemporalEntry<V>,
        _read_at: Instant,
        duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        duration_until_expiry
    }
}
