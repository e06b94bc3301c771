use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Served from a fresh entry
    pub hits: u64,
    /// Started a new computation
    pub misses: u64,
    /// Joined a computation already in flight
    pub coalesced: u64,
    /// Computations that stored a value
    pub computations: u64,
    /// Computations that failed or were aborted
    pub failures: u64,
    /// Entries affected by invalidations
    pub invalidations: u64,
    /// Entries removed by retention sweeps
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses + self.coalesced;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub coalesced: AtomicU64,
    pub computations: AtomicU64,
    pub failures: AtomicU64,
    pub invalidations: AtomicU64,
    pub evictions: AtomicU64,
}

impl StatsCounters {
    #[inline]
    pub fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
