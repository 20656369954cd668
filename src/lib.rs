//! refresh-ahead: two-tier cache loading with background revalidation.
//!
//! A local in-process tier sits in front of a shared remote store. Entries
//! carry absolute expiration and refresh-eligibility instants; once an entry
//! is old enough it is refetched in the background while readers keep being
//! served the still-valid copy:
//!   caller → near tier (moka) → remote store → source
//!
//! Store trouble degrades to a source fetch, source trouble degrades to "no
//! value" or to serving the existing entry. Nothing here is fatal.

pub mod cache;
pub mod clock;
pub mod config;
pub mod metrics;
pub mod refresh;
pub mod source;
pub mod store;

pub use cache::entry::{Freshness, TemporalEntry};
pub use cache::expiry::EntryExpiry;
pub use cache::key::{DisplayKeyScheme, HashingKeyScheme, KeyScheme};
pub use cache::loader::{LoadOutcome, LoaderBuilder, RefreshAheadLoader};
pub use cache::near::NearCache;
pub use cache::stats::{AtomicStatsCounter, CacheStats, StatsCounter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use refresh::{PoolError, RefreshPool, Submission};
pub use source::{FixedPolicy, FreshnessPolicy, Source};
pub use store::{RemoteStore, StoreError};
