//! Reactive Query Cache
//!
//! Keyed by `QueryKey`, each entry holds the last computed value, when it was
//! computed, a stale flag and the key's `CachePolicy`.
//!
//! ## Single-flight
//!
//! ```text
//! get ──┐
//! get ──┤──► one spawned compute ──► store ──► broadcast to every waiter
//! get ──┘
//! ```
//!
//! The compute runs on its own task, so a caller that stops waiting does not
//! cancel it; the result still lands in the cache.
//!
//! ## Invalidation during compute
//!
//! An invalidation that arrives while a key is computing is recorded on the
//! flight. When the compute completes its value is stored already stale, so
//! the next `get` recomputes instead of trusting a result that may predate
//! the change.

use super::entry::{CacheEntry, Computed, EntryState, FlightResult, InFlight};
use super::key::{CachePolicy, InvalidationTarget, QueryKey};
use super::stats::{CacheStats, StatsCounters};
use crate::clock::{CacheClock, ProductionClock};
use crate::error::{AnalyticsError, AnalyticsResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

struct CacheInner<V, C> {
    entries: Mutex<HashMap<QueryKey, CacheEntry<V>>>,
    clock: C,
    stats: StatsCounters,
    next_flight_id: AtomicU64,
}

/// Owned query cache; clones share the same entries.
///
/// Created empty. `clear()` drops every entry (teardown).
pub struct QueryCache<V, C: CacheClock = ProductionClock> {
    inner: Arc<CacheInner<V, C>>,
}

impl<V, C: CacheClock> Clone for QueryCache<V, C> {
    fn clone(&self) -> Self {
        QueryCache {
            inner: self.inner.clone(),
        }
    }
}

enum Lookup<V> {
    Hit(V),
    Join(broadcast::Receiver<FlightResult<V>>),
    Lead {
        rx: broadcast::Receiver<FlightResult<V>>,
        flight_id: u64,
    },
}

impl<V> QueryCache<V, ProductionClock>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_clock(ProductionClock::new())
    }
}

impl<V> Default for QueryCache<V, ProductionClock>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, C> QueryCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: CacheClock,
{
    pub fn with_clock(clock: C) -> Self {
        QueryCache {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                clock,
                stats: StatsCounters::default(),
                next_flight_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn clock(&self) -> &C {
        &self.inner.clock
    }

    /// Return the cached value for `key` if fresh, otherwise compute it.
    ///
    /// Concurrent callers for the same key share one computation. Errors are
    /// delivered to every waiter and are never cached; a previously stored
    /// value for the key is left as it was.
    pub async fn get<F, Fut>(&self, key: QueryKey, policy: CachePolicy, compute: F) -> AnalyticsResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AnalyticsResult<V>> + Send + 'static,
    {
        self.get_computed(key, policy, move || {
            let fut = compute();
            async move { fut.await.map(Computed::complete) }
        })
        .await
    }

    /// Like `get`, but the computation decides whether its value is stored
    /// fresh. An `incomplete` value is still returned to every waiter.
    pub async fn get_computed<F, Fut>(
        &self,
        key: QueryKey,
        policy: CachePolicy,
        compute: F,
    ) -> AnalyticsResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AnalyticsResult<Computed<V>>> + Send + 'static,
    {
        let lookup = self.lookup(&key, policy.normalized());

        let mut rx = match lookup {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Join(rx) => rx,
            Lookup::Lead { rx, flight_id } => {
                let guard = FlightGuard {
                    inner: self.inner.clone(),
                    key: key.clone(),
                    flight_id,
                    completed: false,
                };
                let fut = compute();
                tokio::spawn(async move {
                    let result = fut.await;
                    guard.complete(result);
                });
                rx
            }
        };

        match rx.recv().await {
            Ok(result) => result,
            Err(_) => Err(AnalyticsError::ComputationAborted(key.to_string())),
        }
    }

    fn lookup(&self, key: &QueryKey, policy: CachePolicy) -> Lookup<V> {
        let now = self.inner.clock.now();
        let mut entries = self.inner.entries.lock();

        if let Some(entry) = entries.get_mut(key) {
            if let Some(flight) = entry.in_flight.as_ref() {
                StatsCounters::bump(&self.inner.stats.coalesced, 1);
                debug!(key = %key, flight_id = flight.id, "Joining in-flight computation");
                let rx = flight.sender.subscribe();
                entry.last_access = now;
                return Lookup::Join(rx);
            }
            if entry.is_fresh(now) {
                if let Some(value) = entry.value.as_ref() {
                    StatsCounters::bump(&self.inner.stats.hits, 1);
                    entry.last_access = now;
                    return Lookup::Hit(value.clone());
                }
            }
        }

        StatsCounters::bump(&self.inner.stats.misses, 1);
        let flight_id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
        let (sender, rx) = broadcast::channel(1);

        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::empty(policy, now));
        entry.policy = policy;
        entry.last_access = now;
        entry.in_flight = Some(InFlight {
            id: flight_id,
            sender,
            invalidated: false,
        });

        debug!(key = %key, flight_id, "Starting computation");
        Lookup::Lead { rx, flight_id }
    }

    /// Mark matching entries stale without evicting them.
    /// Returns the number of entries affected.
    pub fn invalidate(&self, target: &InvalidationTarget) -> usize {
        let mut entries = self.inner.entries.lock();
        let mut affected = 0usize;
        for (key, entry) in entries.iter_mut() {
            if target.matches(key) && entry.invalidate() {
                affected += 1;
            }
        }
        drop(entries);

        StatsCounters::bump(&self.inner.stats.invalidations, affected as u64);
        debug!(target = %target, affected, "Invalidated cache entries");
        affected
    }

    /// Drop entries unused for longer than their retention window.
    /// Entries with a computation in flight are kept.
    pub fn evict_expired(&self) -> usize {
        let now = self.inner.clock.now();
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let evicted = before - entries.len();
        let remaining = entries.len();
        drop(entries);

        if evicted > 0 {
            StatsCounters::bump(&self.inner.stats.evictions, evicted as u64);
            info!(evicted, remaining, "Evicted expired cache entries");
        }
        evicted
    }

    pub fn peek_state(&self, key: &QueryKey) -> EntryState {
        let now = self.inner.clock.now();
        self.inner
            .entries
            .lock()
            .get(key)
            .map(|entry| entry.state(now))
            .unwrap_or(EntryState::Absent)
    }

    /// Stored value regardless of freshness, without touching access time
    pub fn peek(&self, key: &QueryKey) -> Option<V> {
        self.inner
            .entries
            .lock()
            .get(key)
            .and_then(|entry| entry.value.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Waiters on in-flight computations receive
    /// `ComputationAborted`.
    pub fn clear(&self) {
        let dropped = {
            let mut entries = self.inner.entries.lock();
            let n = entries.len();
            entries.clear();
            n
        };
        info!(dropped, "Cleared query cache");
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Verify all invariants hold for this cache
    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self) {
        let entries = self.inner.entries.lock();
        for (key, entry) in entries.iter() {
            // Invariant 1: every entry holds a value or a running computation
            debug_assert!(
                entry.value.is_some() || entry.in_flight.is_some(),
                "Invariant violated: entry '{}' has neither value nor computation",
                key
            );

            // Invariant 2: retention never undercuts freshness
            debug_assert!(
                entry.policy.retention >= entry.policy.freshness,
                "Invariant violated: entry '{}' retention below freshness",
                key
            );

            // Invariant 3: a value is never computed after it was last accessed
            debug_assert!(
                entry.value.is_none() || entry.computed_at <= entry.last_access,
                "Invariant violated: entry '{}' computed after last access",
                key
            );
        }
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    pub fn verify_invariants(&self) {}
}

/// Owns the right to finish one flight.
///
/// Dropped without `complete` (panic or runtime shutdown), it releases the
/// flight so waiters see `ComputationAborted` and later gets can retry.
struct FlightGuard<V, C> {
    inner: Arc<CacheInner<V, C>>,
    key: QueryKey,
    flight_id: u64,
    completed: bool,
}

impl<V: Clone, C: CacheClock> FlightGuard<V, C> {
    fn complete(mut self, result: AnalyticsResult<Computed<V>>) {
        self.completed = true;
        let now = self.inner.clock.now();
        let mut entries = self.inner.entries.lock();

        let Some(entry) = entries.get_mut(&self.key) else {
            debug!(key = %self.key, "Entry cleared while computing, result dropped");
            return;
        };
        let Some(flight) = take_flight(entry, self.flight_id) else {
            return;
        };

        let result: FlightResult<V> = match result {
            Ok(computed) => {
                entry.value = Some(computed.value.clone());
                entry.computed_at = now;
                entry.last_access = now;
                entry.stale = flight.invalidated || !computed.complete;
                StatsCounters::bump(&self.inner.stats.computations, 1);
                if flight.invalidated {
                    debug!(key = %self.key, "Invalidated during computation, stored as stale");
                } else if !computed.complete {
                    debug!(key = %self.key, "Incomplete result stored as stale");
                } else {
                    debug!(key = %self.key, "Computation stored");
                }
                Ok(computed.value)
            }
            Err(e) => {
                StatsCounters::bump(&self.inner.stats.failures, 1);
                debug!(key = %self.key, error = %e, "Computation failed");
                if entry.value.is_none() {
                    entries.remove(&self.key);
                } else if flight.invalidated {
                    entry.stale = true;
                }
                Err(e)
            }
        };

        // Sent under the lock: every receiver that joined this flight is
        // subscribed before the flight is taken.
        let _ = flight.sender.send(result);
    }
}

fn take_flight<V>(entry: &mut CacheEntry<V>, flight_id: u64) -> Option<InFlight<V>> {
    match entry.in_flight.as_ref() {
        Some(flight) if flight.id == flight_id => entry.in_flight.take(),
        _ => None,
    }
}

impl<V, C> Drop for FlightGuard<V, C> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get_mut(&self.key) {
            if let Some(flight) = take_flight(entry, self.flight_id) {
                if flight.invalidated && entry.value.is_some() {
                    entry.stale = true;
                }
                if entry.value.is_none() {
                    entries.remove(&self.key);
                }
                StatsCounters::bump(&self.inner.stats.failures, 1);
                debug!(key = %self.key, "Computation aborted");
            }
        }
    }
}
