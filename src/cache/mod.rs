//! Reactive Query Cache
//!
//! Memoizes aggregate computations keyed by query name and parameters.
//!
//! ## Entry lifecycle
//!
//! ```text
//!             get (miss)            compute ok
//!   Absent ─────────────► Computing ───────────► Fresh
//!     ▲                       │                    │ freshness elapsed
//!     │ compute err           │                    │ or invalidate
//!     └───────────────────────┘                    ▼
//!     ▲                                          Stale ──get──► Computing
//!     │ retention elapsed since last access        │
//!     └────────────────────────────────────────────┘
//! ```
//!
//! - At most one computation per key is in flight at any time
//! - Invalidation marks entries stale; only retention sweeps evict
//! - Failures reach every waiter and are never stored
//! - An incomplete result is delivered, then kept stale for the next `get`

mod entry;
mod key;
mod query_cache;
mod stats;
mod sweeper;

pub use entry::{Computed, EntryState};
pub use key::{
    CachePolicy, InvalidationTarget, QueryKey, COHORT_STATISTICS_QUERY, DISTRIBUTION_QUERY,
    TOTALS_QUERY,
};
pub use query_cache::QueryCache;
pub use stats::CacheStats;
pub use sweeper::{CacheSweeper, SweeperHandle};
