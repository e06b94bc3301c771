//! Simulated Record Store with Fault Injection
//!
//! DST-compatible wrapper that injects read failures, timeouts and latency
//! using a seeded RNG, plus targeted failures for specific tables or cohorts.

use super::{RecordStore, StoreError, StoreFuture};
use crate::feed::Table;
use crate::model::{
    CohortMembership, OrganizationRecord, PrecomputedAggregate, Profile, SystemField,
};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::time::Duration;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of a read failing with `Unavailable`
    pub read_fail_prob: f64,
    /// Probability of a read failing with `Timeout`
    pub timeout_prob: f64,
    /// Simulated latency range in milliseconds (min, max)
    pub latency_range_ms: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            read_fail_prob: 0.02,   // 2%
            timeout_prob: 0.01,     // 1%
            latency_range_ms: (0, 0),
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            read_fail_prob: 0.15,
            timeout_prob: 0.05,
            latency_range_ms: (0, 3),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            read_fail_prob: 0.0,
            timeout_prob: 0.0,
            latency_range_ms: (0, 0),
        }
    }

    /// No random faults, fixed latency on every read
    pub fn with_latency(latency: Duration) -> Self {
        let ms = latency.as_millis() as u64;
        SimulatedStoreConfig {
            latency_range_ms: (ms, ms),
            ..Self::no_faults()
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub read_attempts: u64,
    pub read_failures: u64,
    pub timeouts: u64,
    pub targeted_failures: u64,
}

struct SimulatedStoreInner {
    rng: ChaCha8Rng,
    stats: SimulatedStoreStats,
    failing_tables: HashSet<Table>,
    failing_cohorts: HashSet<String>,
}

/// Simulated store that wraps another store and injects faults
pub struct SimulatedRecordStore<S: RecordStore> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Mutex<SimulatedStoreInner>,
}

impl<S: RecordStore> SimulatedRecordStore<S> {
    pub fn new(inner_store: S, seed: u64, config: SimulatedStoreConfig) -> Self {
        SimulatedRecordStore {
            inner_store,
            config,
            state: Mutex::new(SimulatedStoreInner {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedStoreStats::default(),
                failing_tables: HashSet::new(),
                failing_cohorts: HashSet::new(),
            }),
        }
    }

    /// Every read of `table` fails until healed
    pub fn fail_table(&self, table: Table) {
        self.state.lock().failing_tables.insert(table);
    }

    pub fn heal_table(&self, table: Table) {
        self.state.lock().failing_tables.remove(&table);
    }

    /// Membership reads for `cohort` fail until healed
    pub fn fail_cohort(&self, cohort: impl Into<String>) {
        self.state.lock().failing_cohorts.insert(cohort.into());
    }

    pub fn heal_cohort(&self, cohort: &str) {
        self.state.lock().failing_cohorts.remove(cohort);
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    /// Decide the fate of one read: injected error (if any) and latency
    fn decide(&self, table: Table, cohort: Option<&str>) -> (Option<StoreError>, Duration) {
        let mut state = self.state.lock();
        state.stats.read_attempts += 1;

        let (min, max) = self.config.latency_range_ms;
        let latency = if max > min {
            Duration::from_millis(state.rng.gen_range(min..=max))
        } else {
            Duration::from_millis(min)
        };

        let targeted = state.failing_tables.contains(&table)
            || cohort.is_some_and(|c| state.failing_cohorts.contains(c));
        if targeted {
            state.stats.targeted_failures += 1;
            let message = match cohort {
                Some(c) => format!("injected failure for cohort {}", c),
                None => "injected table failure".to_string(),
            };
            return (Some(StoreError::Unavailable { table, message }), latency);
        }

        if self.config.read_fail_prob > 0.0 && state.rng.gen_bool(self.config.read_fail_prob) {
            state.stats.read_failures += 1;
            return (
                Some(StoreError::Unavailable {
                    table,
                    message: "simulated read failure".to_string(),
                }),
                latency,
            );
        }

        if self.config.timeout_prob > 0.0 && state.rng.gen_bool(self.config.timeout_prob) {
            state.stats.timeouts += 1;
            return (Some(StoreError::Timeout { table }), latency);
        }

        (None, latency)
    }
}

async fn apply_latency(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

impl<S: RecordStore> RecordStore for SimulatedRecordStore<S> {
    fn active_organizations<'a>(
        &'a self,
        projection: Option<SystemField>,
    ) -> StoreFuture<'a, Vec<OrganizationRecord>> {
        Box::pin(async move {
            let (fault, latency) = self.decide(Table::Organizations, None);
            apply_latency(latency).await;
            if let Some(e) = fault {
                return Err(e);
            }
            self.inner_store.active_organizations(projection).await
        })
    }

    fn active_organizations_by_name<'a>(
        &'a self,
        names: &'a [String],
    ) -> StoreFuture<'a, Vec<OrganizationRecord>> {
        Box::pin(async move {
            let (fault, latency) = self.decide(Table::Organizations, None);
            apply_latency(latency).await;
            if let Some(e) = fault {
                return Err(e);
            }
            self.inner_store.active_organizations_by_name(names).await
        })
    }

    fn cohort_memberships<'a>(&'a self, cohort: &'a str) -> StoreFuture<'a, Vec<CohortMembership>> {
        Box::pin(async move {
            let (fault, latency) = self.decide(Table::CohortMemberships, Some(cohort));
            apply_latency(latency).await;
            if let Some(e) = fault {
                return Err(e);
            }
            self.inner_store.cohort_memberships(cohort).await
        })
    }

    fn profiles_by_user_ids<'a>(&'a self, user_ids: &'a [String]) -> StoreFuture<'a, Vec<Profile>> {
        Box::pin(async move {
            let (fault, latency) = self.decide(Table::Profiles, None);
            apply_latency(latency).await;
            if let Some(e) = fault {
                return Err(e);
            }
            self.inner_store.profiles_by_user_ids(user_ids).await
        })
    }

    fn precomputed_aggregates<'a>(
        &'a self,
        family: &'a str,
    ) -> StoreFuture<'a, Vec<PrecomputedAggregate>> {
        Box::pin(async move {
            let (fault, latency) = self.decide(Table::PrecomputedAggregates, None);
            apply_latency(latency).await;
            if let Some(e) = fault {
                return Err(e);
            }
            self.inner_store.precomputed_aggregates(family).await
        })
    }
}
