//! Temporal cache entries.
//!
//! A [`TemporalEntry`] is the unit stored in both tiers. It carries its own
//! absolute expiration and refresh-eligibility instants, so every reader agrees
//! on staleness regardless of which tier handed it the entry or what native TTL
//! that tier applied.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Where an entry sits on its lifetime at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    /// Servable, no refresh needed yet.
    Fresh,
    /// Servable, but old enough to be revalidated in the background.
    RefreshEligible,
    /// Must not be served.
    Expired,
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Freshness::Fresh => write!(f, "fresh"),
            Freshness::RefreshEligible => write!(f, "refresh-eligible"),
            Freshness::Expired => write!(f, "expired"),
        }
    }
}

/// Immutable value envelope with absolute expiration and refresh instants.
///
/// `refresh_eligible_at <= expires_at` is expected but not enforced; expiry
/// always wins when classifying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalEntry<V> {
    value: Option<V>,
    expires_at: DateTime<Utc>,
    refresh_eligible_at: DateTime<Utc>,
}

impl<V> TemporalEntry<V> {
    /// Wrap a freshly fetched value. Instants are `now` plus the given durations.
    pub fn new(value: V, expiration: Duration, refresh_eligible: Duration, now: DateTime<Utc>) -> Self {
        Self::with_value(Some(value), expiration, refresh_eligible, now)
    }

    /// An entry recording that the source had nothing for the key.
    pub fn absent(expiration: Duration, refresh_eligible: Duration, now: DateTime<Utc>) -> Self {
        Self::with_value(None, expiration, refresh_eligible, now)
    }

    /// Build an entry from already-computed absolute instants.
    pub fn from_parts(
        value: Option<V>,
        expires_at: DateTime<Utc>,
        refresh_eligible_at: DateTime<Utc>,
    ) -> Self {
        Self {
            value,
            expires_at,
            refresh_eligible_at,
        }
    }

    fn with_value(
        value: Option<V>,
        expiration: Duration,
        refresh_eligible: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            value,
            expires_at: instant_after(now, expiration),
            refresh_eligible_at: instant_after(now, refresh_eligible),
        }
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<V> {
        self.value
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn refresh_eligible_at(&self) -> DateTime<Utc> {
        self.refresh_eligible_at
    }

    /// Whether the entry must no longer be served.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the entry is old enough to be refreshed ahead of expiry.
    pub fn is_refresh_eligible(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_eligible_at
    }

    /// Classify the entry at `now`. Expiry takes precedence over eligibility.
    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        if self.is_expired(now) {
            Freshness::Expired
        } else if self.is_refresh_eligible(now) {
            Freshness::RefreshEligible
        } else {
            Freshness::Fresh
        }
    }

    /// Time left before expiry, clamped at zero.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// `now + d`, saturating at the largest representable instant.
fn instant_after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(d)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn at(offset_ms: i64) -> DateTime<Utc> {
        t0() + TimeDelta::milliseconds(offset_ms)
    }

    #[test]
    fn test_instants_are_relative_to_now() {
        let entry = TemporalEntry::new("v", secs(60), secs(30), t0());
        assert_eq!(entry.expires_at(), at(60_000));
        assert_eq!(entry.refresh_eligible_at(), at(30_000));
        assert_eq!(entry.value(), Some(&"v"));
    }

    #[test]
    fn test_freshness_progression() {
        let entry = TemporalEntry::new(1u32, secs(60), secs(30), t0());
        assert_eq!(entry.freshness(at(29_000)), Freshness::Fresh);
        assert_eq!(entry.freshness(at(30_000)), Freshness::RefreshEligible);
        assert_eq!(entry.freshness(at(31_000)), Freshness::RefreshEligible);
        assert_eq!(entry.freshness(at(60_000)), Freshness::Expired);
        assert_eq!(entry.freshness(at(61_000)), Freshness::Expired);
    }

    #[test]
    fn test_expiry_is_monotonic() {
        let entry = TemporalEntry::new((), secs(10), secs(5), t0());
        let mut seen_expired = false;
        for ms in (0..20_000).step_by(250) {
            let expired = entry.is_expired(at(ms));
            if seen_expired {
                assert!(expired, "entry became unexpired again at +{ms}ms");
            }
            seen_expired |= expired;
        }
        assert!(seen_expired);
    }

    #[test]
    fn test_refresh_boundary_before_expiry() {
        for (expire, refresh) in [(60, 30), (10, 10), (5, 0), (3600, 3599)] {
            let entry = TemporalEntry::new((), secs(expire), secs(refresh), t0());
            let boundary = refresh as i64 * 1000;
            assert!(entry.is_refresh_eligible(at(boundary)));
            assert!(!entry.is_expired(at(boundary - 1)));
        }
    }

    #[test]
    fn test_zero_refresh_duration_is_always_eligible() {
        let entry = TemporalEntry::new("hot", secs(60), Duration::ZERO, t0());
        assert!(entry.is_refresh_eligible(t0()));
        assert!(!entry.is_expired(t0()));
        assert_eq!(entry.freshness(t0()), Freshness::RefreshEligible);
    }

    #[test]
    fn test_refresh_after_expiry_goes_straight_to_expired() {
        let entry = TemporalEntry::new("x", secs(10), secs(20), t0());
        assert_eq!(entry.freshness(at(0)), Freshness::Fresh);
        assert_eq!(entry.freshness(at(9_999)), Freshness::Fresh);
        assert_eq!(entry.freshness(at(10_000)), Freshness::Expired);
    }

    #[test]
    fn test_remaining_clamps_at_zero() {
        let entry = TemporalEntry::new((), secs(60), secs(30), t0());
        assert_eq!(entry.remaining(t0()), secs(60));
        assert_eq!(entry.remaining(at(45_500)), Duration::from_millis(14_500));
        assert_eq!(entry.remaining(at(90_000)), Duration::ZERO);
    }

    #[test]
    fn test_huge_duration_saturates() {
        let entry = TemporalEntry::new((), Duration::MAX, secs(1), t0());
        assert_eq!(entry.expires_at(), DateTime::<Utc>::MAX_UTC);
        assert!(!entry.is_expired(at(i64::from(i32::MAX))));
    }

    #[test]
    fn test_absent_entry() {
        let entry: TemporalEntry<String> = TemporalEntry::absent(secs(5), secs(1), t0());
        assert!(!entry.has_value());
        assert!(entry.into_value().is_none());
    }

    #[test]
    fn test_serde_preserves_instants() {
        let entry = TemporalEntry::new(vec![1u8, 2, 3], secs(60), secs(30), at(123));
        let json = serde_json::to_string(&entry).unwrap();
        let back: TemporalEntry<Vec<u8>> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
