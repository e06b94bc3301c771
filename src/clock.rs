//! Cache time source
//!
//! Entries record when they were computed and last read as millisecond
//! offsets from the clock's origin. `ProductionClock` counts from process
//! start; `SimulatedClock` only moves when a test or the DST harness moves it,
//! so freshness and retention can be stepped through deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Milliseconds since the clock's origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CacheTimestamp(pub u64);

impl CacheTimestamp {
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

/// Source of "now" for freshness and retention checks
pub trait CacheClock: Send + Sync + Clone + 'static {
    fn now(&self) -> CacheTimestamp;
}

/// Wall clock, monotonic from construction
#[derive(Clone)]
pub struct ProductionClock {
    origin: Instant,
}

impl Default for ProductionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductionClock {
    pub fn new() -> Self {
        ProductionClock {
            origin: Instant::now(),
        }
    }
}

impl CacheClock for ProductionClock {
    fn now(&self) -> CacheTimestamp {
        CacheTimestamp(self.origin.elapsed().as_millis() as u64)
    }
}

/// Manually stepped clock. Clones share one time cell, so the harness can
/// keep a handle while the cache owns another.
#[derive(Clone, Default)]
pub struct SimulatedClock {
    now_ms: Arc<AtomicU64>,
}

impl SimulatedClock {
    pub fn new(start_ms: u64) -> Self {
        SimulatedClock {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Step past a whole window, e.g. `advance(policy.freshness)`
    pub fn advance(&self, window: Duration) {
        self.advance_ms(window.as_millis() as u64);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl CacheClock for SimulatedClock {
    fn now(&self) -> CacheTimestamp {
        CacheTimestamp(self.now_ms.load(Ordering::SeqCst))
    }
}
