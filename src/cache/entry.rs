use super::key::CachePolicy;
use crate::clock::CacheTimestamp;
use crate::error::AnalyticsError;
use std::time::Duration;
use tokio::sync::broadcast;

/// Observable state of one cache key
///
/// ```text
/// Absent → Computing → Fresh → Stale → Computing
///                                    ↘ Absent (evicted)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Absent,
    Computing,
    Fresh,
    Stale,
}

pub(crate) type FlightResult<V> = Result<V, AnalyticsError>;

/// Output of a computation, with whether it is fit to be served fresh.
///
/// An incomplete value is stored and delivered to the flight's waiters but
/// kept stale, so the next `get` recomputes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Computed<V> {
    pub value: V,
    pub complete: bool,
}

impl<V> Computed<V> {
    pub fn complete(value: V) -> Self {
        Computed {
            value,
            complete: true,
        }
    }

    pub fn incomplete(value: V) -> Self {
        Computed {
            value,
            complete: false,
        }
    }
}

/// A computation currently running for a key
pub(crate) struct InFlight<V> {
    pub id: u64,
    pub sender: broadcast::Sender<FlightResult<V>>,
    /// Set when an invalidation lands while the computation runs
    pub invalidated: bool,
}

pub(crate) struct CacheEntry<V> {
    pub value: Option<V>,
    pub computed_at: CacheTimestamp,
    pub last_access: CacheTimestamp,
    pub stale: bool,
    pub policy: CachePolicy,
    pub in_flight: Option<InFlight<V>>,
}

/// Time between `since` and `now`; zero if `now` is earlier
fn age(now: CacheTimestamp, since: CacheTimestamp) -> Duration {
    Duration::from_millis(now.0.saturating_sub(since.0))
}

impl<V> CacheEntry<V> {
    pub fn empty(policy: CachePolicy, now: CacheTimestamp) -> Self {
        CacheEntry {
            value: None,
            computed_at: now,
            last_access: now,
            stale: false,
            policy,
            in_flight: None,
        }
    }

    /// Holds a value that is neither flagged stale nor past its freshness window
    pub fn is_fresh(&self, now: CacheTimestamp) -> bool {
        self.value.is_some()
            && !self.stale
            && age(now, self.computed_at) < self.policy.freshness
    }

    /// Unused for at least the retention window and not computing
    pub fn is_expired(&self, now: CacheTimestamp) -> bool {
        self.in_flight.is_none() && age(now, self.last_access) >= self.policy.retention
    }

    pub fn state(&self, now: CacheTimestamp) -> EntryState {
        if self.in_flight.is_some() {
            EntryState::Computing
        } else if self.is_fresh(now) {
            EntryState::Fresh
        } else if self.value.is_some() {
            EntryState::Stale
        } else {
            EntryState::Absent
        }
    }

    /// Mark stale; an in-flight computation will store its result stale.
    /// Returns true when the entry was affected.
    pub fn invalidate(&mut self) -> bool {
        let mut affected = false;
        if let Some(flight) = self.in_flight.as_mut() {
            flight.invalidated = true;
            affected = true;
        }
        if self.value.is_some() {
            self.stale = true;
            affected = true;
        }
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CachePolicy {
        CachePolicy::new(Duration::from_millis(100), Duration::from_millis(1000))
    }

    #[test]
    fn test_freshness_window() {
        let mut entry: CacheEntry<u64> = CacheEntry::empty(policy(), CacheTimestamp(0));
        assert_eq!(entry.state(CacheTimestamp(0)), EntryState::Absent);

        entry.value = Some(7);
        assert_eq!(entry.state(CacheTimestamp(99)), EntryState::Fresh);
        assert_eq!(entry.state(CacheTimestamp(100)), EntryState::Stale);
    }

    #[test]
    fn test_invalidate_flags_value() {
        let mut entry: CacheEntry<u64> = CacheEntry::empty(policy(), CacheTimestamp(0));
        assert!(!entry.invalidate(), "Empty entry has nothing to invalidate");

        entry.value = Some(7);
        assert!(entry.invalidate());
        assert_eq!(entry.state(CacheTimestamp(1)), EntryState::Stale);
    }

    #[test]
    fn test_retention_from_last_access() {
        let mut entry: CacheEntry<u64> = CacheEntry::empty(policy(), CacheTimestamp(0));
        entry.value = Some(1);
        entry.last_access = CacheTimestamp(500);

        assert!(!entry.is_expired(CacheTimestamp(1499)));
        assert!(entry.is_expired(CacheTimestamp(1500)));
    }

    #[test]
    fn test_timestamp_ahead_of_now_has_zero_age() {
        let mut entry: CacheEntry<u64> = CacheEntry::empty(policy(), CacheTimestamp(400));
        entry.value = Some(1);

        assert_eq!(age(CacheTimestamp(100), entry.computed_at), Duration::ZERO);
        assert_eq!(entry.state(CacheTimestamp(100)), EntryState::Fresh);
        assert!(!entry.is_expired(CacheTimestamp(100)));
    }
}
