//! Stateright Model for one cache entry
//!
//! Exhaustively interleaves callers, a single in-flight computation, record
//! writes and change-event delivery for one key:
//!
//! - LATE_INVALIDATION_NOT_LOST: once every change event has been delivered,
//!   a fresh entry holds a value computed from the current data
//! - WAITERS_SHARE_FLIGHT: a waiting caller always has a computation to wait on
//! - SERVED_FROM_STORED_VALUE: a caller served from the cache got the stored value
//!
//! A computation reads the data at some point after it starts and stores that
//! version when it completes, so a write can land between the read and the
//! store. Only the flight's invalidation mark keeps that result from looking
//! fresh.

use stateright::{Model, Property};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallerState {
    Idle,
    Waiting,
    /// Received a value computed from this data version
    Served(u8),
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Flight {
    /// Data version observed by the computation, once it has read
    pub read_version: Option<u8>,
    pub invalidated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntryModelState {
    /// Current version of the underlying records
    pub data_version: u8,
    /// Change events published but not yet delivered to the cache
    pub pending_events: u8,
    /// Version the stored value was computed from
    pub value: Option<u8>,
    pub stale: bool,
    pub flight: Option<Flight>,
    pub callers: Vec<CallerState>,
    pub computations_started: u8,
}

impl EntryModelState {
    pub fn new(callers: usize) -> Self {
        EntryModelState {
            data_version: 0,
            pending_events: 0,
            value: None,
            stale: false,
            flight: None,
            callers: vec![CallerState::Idle; callers],
            computations_started: 0,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.value.is_some() && !self.stale && self.flight.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntryAction {
    Get(usize),
    /// Caller drops its result and may ask again
    Reset(usize),
    ComputeRead,
    ComputeComplete,
    ComputeFail,
    Write,
    DeliverEvent,
    /// Freshness window elapsed
    Expire,
}

pub struct CacheEntryModel {
    pub callers: usize,
    pub max_writes: u8,
    pub max_computations: u8,
    /// Whether completion honors an invalidation that landed mid-flight
    pub honor_flight_invalidation: bool,
}

impl CacheEntryModel {
    pub fn new() -> Self {
        CacheEntryModel {
            callers: 2,
            max_writes: 2,
            max_computations: 3,
            honor_flight_invalidation: true,
        }
    }

    /// Completion that ignores mid-flight invalidation
    pub fn lossy() -> Self {
        CacheEntryModel {
            honor_flight_invalidation: false,
            ..Self::new()
        }
    }
}

impl Default for CacheEntryModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for CacheEntryModel {
    type State = EntryModelState;
    type Action = EntryAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![EntryModelState::new(self.callers)]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for (i, caller) in state.callers.iter().enumerate() {
            match caller {
                CallerState::Idle => {
                    let would_start = !state.is_fresh() && state.flight.is_none();
                    if !would_start || state.computations_started < self.max_computations {
                        actions.push(EntryAction::Get(i));
                    }
                }
                CallerState::Served(_) | CallerState::Failed => actions.push(EntryAction::Reset(i)),
                CallerState::Waiting => {}
            }
        }

        if let Some(flight) = &state.flight {
            if flight.read_version.is_none() {
                actions.push(EntryAction::ComputeRead);
                actions.push(EntryAction::ComputeFail);
            } else {
                actions.push(EntryAction::ComputeComplete);
            }
        }

        if state.data_version < self.max_writes {
            actions.push(EntryAction::Write);
        }
        if state.pending_events > 0 {
            actions.push(EntryAction::DeliverEvent);
        }
        if state.value.is_some() && !state.stale {
            actions.push(EntryAction::Expire);
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();

        match action {
            EntryAction::Get(i) => {
                if next.callers[i] != CallerState::Idle {
                    return None;
                }
                if next.is_fresh() {
                    next.callers[i] = CallerState::Served(next.value?);
                } else {
                    if next.flight.is_none() {
                        next.flight = Some(Flight {
                            read_version: None,
                            invalidated: false,
                        });
                        next.computations_started += 1;
                    }
                    next.callers[i] = CallerState::Waiting;
                }
            }

            EntryAction::Reset(i) => {
                next.callers[i] = CallerState::Idle;
            }

            EntryAction::ComputeRead => {
                let flight = next.flight.as_mut()?;
                flight.read_version = Some(state.data_version);
            }

            EntryAction::ComputeComplete => {
                let flight = next.flight.take()?;
                let version = flight.read_version?;
                next.value = Some(version);
                next.stale = self.honor_flight_invalidation && flight.invalidated;
                for caller in next.callers.iter_mut() {
                    if *caller == CallerState::Waiting {
                        *caller = CallerState::Served(version);
                    }
                }
            }

            EntryAction::ComputeFail => {
                next.flight.take()?;
                for caller in next.callers.iter_mut() {
                    if *caller == CallerState::Waiting {
                        *caller = CallerState::Failed;
                    }
                }
            }

            EntryAction::Write => {
                next.data_version += 1;
                next.pending_events += 1;
            }

            EntryAction::DeliverEvent => {
                next.pending_events = next.pending_events.checked_sub(1)?;
                if next.value.is_some() {
                    next.stale = true;
                }
                if let Some(flight) = next.flight.as_mut() {
                    flight.invalidated = true;
                }
            }

            EntryAction::Expire => {
                next.stale = true;
            }
        }

        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            // INVARIANT 1: quiescent fresh entries are current
            Property::always(
                "late_invalidation_not_lost",
                |_model: &CacheEntryModel, state: &EntryModelState| {
                    if state.pending_events == 0 && state.is_fresh() {
                        state.value == Some(state.data_version)
                    } else {
                        true
                    }
                },
            ),
            // INVARIANT 2: nobody waits without a computation
            Property::always(
                "waiters_share_flight",
                |_model: &CacheEntryModel, state: &EntryModelState| {
                    let waiting = state.callers.iter().any(|c| *c == CallerState::Waiting);
                    !waiting || state.flight.is_some()
                },
            ),
            // INVARIANT 3: served versions never exceed the data
            Property::always(
                "served_from_stored_value",
                |_model: &CacheEntryModel, state: &EntryModelState| {
                    state.callers.iter().all(|c| match c {
                        CallerState::Served(v) => *v <= state.data_version,
                        _ => true,
                    })
                },
            ),
            Property::sometimes(
                "value_served_to_every_caller",
                |_model: &CacheEntryModel, state: &EntryModelState| {
                    state.callers.iter().all(|c| matches!(c, CallerState::Served(_)))
                },
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_starts_single_flight() {
        let model = CacheEntryModel::new();
        let s0 = EntryModelState::new(2);

        let s1 = model.next_state(&s0, EntryAction::Get(0)).unwrap();
        let s2 = model.next_state(&s1, EntryAction::Get(1)).unwrap();

        assert_eq!(s2.computations_started, 1);
        assert_eq!(s2.callers, vec![CallerState::Waiting, CallerState::Waiting]);
        assert!(s2.flight.is_some());
    }

    #[test]
    fn test_completion_serves_all_waiters() {
        let model = CacheEntryModel::new();
        let mut s = EntryModelState::new(2);
        for action in [
            EntryAction::Get(0),
            EntryAction::Get(1),
            EntryAction::ComputeRead,
            EntryAction::ComputeComplete,
        ] {
            s = model.next_state(&s, action).unwrap();
        }

        assert_eq!(s.callers, vec![CallerState::Served(0), CallerState::Served(0)]);
        assert!(s.is_fresh());
    }

    #[test]
    fn test_write_during_flight_stores_stale() {
        let model = CacheEntryModel::new();
        let mut s = EntryModelState::new(1);
        for action in [
            EntryAction::Get(0),
            EntryAction::ComputeRead,
            EntryAction::Write,
            EntryAction::DeliverEvent,
            EntryAction::ComputeComplete,
        ] {
            s = model.next_state(&s, action).unwrap();
        }

        assert_eq!(s.value, Some(0));
        assert_eq!(s.data_version, 1);
        assert!(s.stale, "Result read before the write must not be fresh");
    }

    #[test]
    fn test_failure_keeps_previous_value() {
        let model = CacheEntryModel::new();
        let mut s = EntryModelState::new(1);
        for action in [
            EntryAction::Get(0),
            EntryAction::ComputeRead,
            EntryAction::ComputeComplete,
            EntryAction::Reset(0),
            EntryAction::Expire,
            EntryAction::Get(0),
            EntryAction::ComputeFail,
        ] {
            s = model.next_state(&s, action).unwrap();
        }

        assert_eq!(s.callers, vec![CallerState::Failed]);
        assert_eq!(s.value, Some(0));
        assert!(s.stale);
    }

    #[test]
    #[ignore] // Run with: cargo test stateright_cache_entry -- --ignored --nocapture
    fn stateright_cache_entry_model_check() {
        use stateright::Checker;

        let model = CacheEntryModel::new();
        let checker = model.checker().spawn_bfs().join();

        println!("States explored: {}", checker.unique_state_count());
        checker.assert_properties();
        println!("Model check passed! All cache entry invariants hold.");
    }

    #[test]
    #[ignore]
    fn stateright_lossy_completion_is_caught() {
        use stateright::Checker;

        let model = CacheEntryModel::lossy();
        let checker = model.checker().spawn_bfs().join();

        assert!(
            checker.discovery("late_invalidation_not_lost").is_some(),
            "Ignoring mid-flight invalidation must violate the invariant"
        );
    }
}
