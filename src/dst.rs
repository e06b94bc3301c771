//! Deterministic Simulation Testing for the analytics engine
//!
//! Drives an `AnalyticsService` with a seeded workload of queries, record
//! mutations, invalidations, clock advances and sweeps, against a
//! fault-injecting store. After every successful query the served value is
//! compared with a direct computation over the unfaulted tables.
//!
//! ## Invariants checked
//!
//! - A served aggregate always equals the aggregate of the current tables,
//!   so no change event delivered before the query was lost
//! - A failed query never leaves its key `Fresh`
//! - Concurrent identical queries start at most one computation
//! - Every miss ends in exactly one stored computation or one failure
//!
//! ```text
//! for seed in 0..N {
//!     let mut harness = AnalyticsDSTHarness::new(AnalyticsDSTConfig::moderate(seed)).await;
//!     harness.run(500).await;
//!     harness.check_invariants();   // violations carry the seed
//! }
//! ```

use crate::aggregate::{bucket_distribution, compute_cohort_statistics, read_totals};
use crate::cache::{EntryState, InvalidationTarget};
use crate::clock::{CacheClock, SimulatedClock};
use crate::config::AnalyticsConfig;
use crate::feed::{InMemoryChangeFeed, Table};
use crate::model::{
    CohortMembership, MembershipStatus, OrganizationRecord, PrecomputedAggregate, Profile,
    SystemField,
};
use crate::service::{cohort_statistics_key, distribution_key, totals_key, AnalyticsService};
use crate::store::{
    InMemoryRecordStore, RecordStore, SimulatedRecordStore, SimulatedStoreConfig,
    SimulatedStoreStats,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

const ORGANIZATION_POOL: usize = 40;
const USER_POOL: usize = 30;
const VENDORS: [&str; 3] = ["Workday", "Oracle", "Ellucian"];
const FIELDS: [SystemField; 3] = [SystemField::Payroll, SystemField::Housing, SystemField::HelpDesk];
const BURST_MAX: usize = 8;

/// Configuration for analytics DST
#[derive(Debug, Clone)]
pub struct AnalyticsDSTConfig {
    pub seed: u64,
    pub store_config: SimulatedStoreConfig,
    /// Probability that an operation is a record mutation
    pub mutation_probability: f64,
    /// Probability that an operation toggles a targeted table failure
    pub outage_probability: f64,
    /// Upper bound for a single clock advance
    pub max_clock_step_ms: u64,
}

impl Default for AnalyticsDSTConfig {
    fn default() -> Self {
        AnalyticsDSTConfig {
            seed: 0,
            store_config: SimulatedStoreConfig::default(),
            mutation_probability: 0.3,
            outage_probability: 0.02,
            max_clock_step_ms: 1_000,
        }
    }
}

impl AnalyticsDSTConfig {
    pub fn new(seed: u64) -> Self {
        AnalyticsDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// No faults at all
    pub fn calm(seed: u64) -> Self {
        AnalyticsDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            outage_probability: 0.0,
            ..Default::default()
        }
    }

    pub fn moderate(seed: u64) -> Self {
        AnalyticsDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Frequent read failures and table outages
    pub fn chaos(seed: u64) -> Self {
        AnalyticsDSTConfig {
            seed,
            store_config: SimulatedStoreConfig {
                latency_range_ms: (0, 0),
                ..SimulatedStoreConfig::high_chaos()
            },
            outage_probability: 0.08,
            ..Default::default()
        }
    }

    fn faults_enabled(&self) -> bool {
        self.store_config.read_fail_prob > 0.0
            || self.store_config.timeout_prob > 0.0
            || self.outage_probability > 0.0
    }
}

#[derive(Debug, Clone)]
pub enum AnalyticsOperation {
    QueryDistribution(SystemField),
    QueryTotals,
    QueryCohorts,
    /// Several identical distribution queries polled together
    Burst { field: SystemField, callers: usize },
    UpsertOrganization(OrganizationRecord),
    RemoveOrganization(String),
    AddMembership(CohortMembership),
    UpsertProfile(Profile),
    SetAggregate(PrecomputedAggregate),
    InvalidateAll,
    AdvanceClock(u64),
    Sweep,
    /// Start (true) or end (false) an outage of one table
    Outage { table: Table, failing: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Success,
    /// Query failed (expected under fault injection)
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct RecordedOperation {
    pub id: u64,
    pub operation: AnalyticsOperation,
    pub outcome: OperationOutcome,
    pub clock_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AnalyticsDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub queries: u64,
    pub failed_queries: u64,
    pub mutations: u64,
    pub store_stats: SimulatedStoreStats,
    pub invariant_violations: Vec<String>,
    pub history: Vec<RecordedOperation>,
}

impl AnalyticsDSTResult {
    pub fn new(seed: u64) -> Self {
        AnalyticsDSTResult {
            seed,
            total_operations: 0,
            queries: 0,
            failed_queries: 0,
            mutations: 0,
            store_stats: SimulatedStoreStats::default(),
            invariant_violations: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops, {} queries ({} failed), {} mutations, {} violations",
            self.seed,
            self.total_operations,
            self.queries,
            self.failed_queries,
            self.mutations,
            self.invariant_violations.len()
        )
    }
}

/// Seeded operation generator
pub struct AnalyticsWorkload {
    rng: ChaCha8Rng,
    config: AnalyticsDSTConfig,
    cohorts: Vec<String>,
}

impl AnalyticsWorkload {
    pub fn new(config: AnalyticsDSTConfig, cohorts: Vec<String>) -> Self {
        AnalyticsWorkload {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            cohorts,
        }
    }

    fn organization_name(i: usize) -> String {
        format!("Org {}", i)
    }

    fn random_organization(&mut self) -> OrganizationRecord {
        let i = self.rng.gen_range(0..ORGANIZATION_POOL);
        let status = if self.rng.gen_bool(0.85) {
            MembershipStatus::Active
        } else {
            MembershipStatus::Inactive
        };
        let mut record =
            OrganizationRecord::new(format!("o{}", i), Self::organization_name(i), status);
        for field in FIELDS {
            match self.rng.gen_range(0..10) {
                0 => {}
                1 => record = record.with_system(field, "  "),
                n => record = record.with_system(field, VENDORS[n as usize % VENDORS.len()]),
            }
        }
        record
    }

    fn random_cohort(&mut self) -> String {
        let i = self.rng.gen_range(0..self.cohorts.len());
        self.cohorts[i].clone()
    }

    pub fn next_operation(&mut self) -> AnalyticsOperation {
        if self.rng.gen_bool(self.config.outage_probability) {
            let table = Table::ALL[self.rng.gen_range(0..Table::ALL.len())];
            return AnalyticsOperation::Outage {
                table,
                failing: self.rng.gen_bool(0.5),
            };
        }

        if self.rng.gen_bool(self.config.mutation_probability) {
            return match self.rng.gen_range(0..10) {
                0..=3 => AnalyticsOperation::UpsertOrganization(self.random_organization()),
                4 => AnalyticsOperation::RemoveOrganization(format!(
                    "o{}",
                    self.rng.gen_range(0..ORGANIZATION_POOL)
                )),
                5 | 6 => {
                    let user = format!("u{}", self.rng.gen_range(0..USER_POOL));
                    AnalyticsOperation::AddMembership(CohortMembership::new(user, self.random_cohort()))
                }
                7 | 8 => {
                    let user = format!("u{}", self.rng.gen_range(0..USER_POOL));
                    let org = match self.rng.gen_range(0..8) {
                        0 => None,
                        1 => Some("Unlisted College".to_string()),
                        _ => Some(Self::organization_name(self.rng.gen_range(0..ORGANIZATION_POOL))),
                    };
                    AnalyticsOperation::UpsertProfile(Profile::new(user.clone(), user, org.as_deref()))
                }
                _ => {
                    let name = ["total_organizations", "total_members", "total_weighted_headcount"]
                        [self.rng.gen_range(0..3)];
                    AnalyticsOperation::SetAggregate(PrecomputedAggregate::new(
                        "organization_totals",
                        name,
                        self.rng.gen_range(0..10_000),
                    ))
                }
            };
        }

        match self.rng.gen_range(0..20) {
            0..=5 => AnalyticsOperation::QueryDistribution(FIELDS[self.rng.gen_range(0..FIELDS.len())]),
            6..=8 => AnalyticsOperation::QueryTotals,
            9..=11 => AnalyticsOperation::QueryCohorts,
            12 | 13 => AnalyticsOperation::Burst {
                field: FIELDS[self.rng.gen_range(0..FIELDS.len())],
                callers: self.rng.gen_range(2..=BURST_MAX),
            },
            14 => AnalyticsOperation::InvalidateAll,
            15..=17 => AnalyticsOperation::AdvanceClock(
                self.rng.gen_range(1..=self.config.max_clock_step_ms),
            ),
            _ => AnalyticsOperation::Sweep,
        }
    }
}

type DSTStore = SimulatedRecordStore<InMemoryRecordStore>;

/// DST harness for the analytics engine
pub struct AnalyticsDSTHarness {
    config: AnalyticsDSTConfig,
    clock: SimulatedClock,
    store: Arc<DSTStore>,
    tables: InMemoryRecordStore,
    service: AnalyticsService<SimulatedClock>,
    workload: AnalyticsWorkload,
    result: AnalyticsDSTResult,
    /// Change events published so far; the subscriber must have seen them all
    published_events: u64,
}

impl AnalyticsDSTHarness {
    pub async fn new(config: AnalyticsDSTConfig) -> Self {
        let feed = InMemoryChangeFeed::new();
        let tables = InMemoryRecordStore::with_feed(feed.clone());
        let store = Arc::new(SimulatedRecordStore::new(
            tables.clone(),
            config.seed.wrapping_add(1),
            config.store_config.clone(),
        ));
        let clock = SimulatedClock::new(0);

        let analytics_config = AnalyticsConfig::test();
        let cohorts = analytics_config.cohorts.clone();
        let mut service = AnalyticsService::with_clock(store.clone(), analytics_config, clock.clone());
        service.attach_change_feed(Arc::new(feed)).await;

        let workload = AnalyticsWorkload::new(config.clone(), cohorts);
        let result = AnalyticsDSTResult::new(config.seed);

        AnalyticsDSTHarness {
            config,
            clock,
            store,
            tables,
            service,
            workload,
            result,
            published_events: 0,
        }
    }

    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.workload.next_operation();
            self.execute_operation(op).await;
        }
    }

    async fn execute_operation(&mut self, op: AnalyticsOperation) {
        self.result.total_operations += 1;
        let op_id = self.result.total_operations;

        let outcome = match &op {
            AnalyticsOperation::QueryDistribution(field) => self.query_distribution(*field).await,
            AnalyticsOperation::QueryTotals => self.query_totals().await,
            AnalyticsOperation::QueryCohorts => self.query_cohorts().await,
            AnalyticsOperation::Burst { field, callers } => self.burst(*field, *callers).await,
            AnalyticsOperation::UpsertOrganization(record) => {
                self.tables.upsert_organization(record.clone());
                self.mutated().await
            }
            AnalyticsOperation::RemoveOrganization(id) => {
                if self.tables.remove_organization(id) {
                    self.mutated().await
                } else {
                    OperationOutcome::Success
                }
            }
            AnalyticsOperation::AddMembership(membership) => {
                self.tables.add_membership(membership.clone());
                self.mutated().await
            }
            AnalyticsOperation::UpsertProfile(profile) => {
                self.tables.upsert_profile(profile.clone());
                self.mutated().await
            }
            AnalyticsOperation::SetAggregate(aggregate) => {
                self.tables.set_aggregate(aggregate.clone());
                self.mutated().await
            }
            AnalyticsOperation::InvalidateAll => {
                self.service.invalidate(&InvalidationTarget::All);
                OperationOutcome::Success
            }
            AnalyticsOperation::AdvanceClock(ms) => {
                self.clock.advance_ms(*ms);
                OperationOutcome::Success
            }
            AnalyticsOperation::Sweep => {
                self.service.evict_expired();
                OperationOutcome::Success
            }
            AnalyticsOperation::Outage { table, failing } => {
                if *failing {
                    self.store.fail_table(*table);
                } else {
                    self.store.heal_table(*table);
                }
                OperationOutcome::Success
            }
        };

        if let OperationOutcome::Failed(_) = outcome {
            self.result.failed_queries += 1;
        }
        self.result.history.push(RecordedOperation {
            id: op_id,
            operation: op,
            outcome,
            clock_ms: self.clock.now().as_millis(),
        });
    }

    fn violation(&mut self, message: String) {
        self.result
            .invariant_violations
            .push(format!("seed {} op {}: {}", self.config.seed, self.result.total_operations, message));
    }

    /// Wait until the subscriber has applied every published change
    async fn mutated(&mut self) -> OperationOutcome {
        self.result.mutations += 1;
        self.published_events += 1;
        loop {
            let seen = self
                .service
                .subscriber_status()
                .map(|s| s.events_received)
                .unwrap_or(0);
            if seen >= self.published_events {
                break;
            }
            tokio::task::yield_now().await;
        }
        OperationOutcome::Success
    }

    fn query_failed(&mut self, key: crate::cache::QueryKey, error: String) -> OperationOutcome {
        if !self.config.faults_enabled() {
            self.violation(format!("{} failed without faults: {}", key, error));
        }
        if self.service.entry_state(&key) == EntryState::Fresh {
            self.violation(format!("{} is Fresh after a failed computation", key));
        }
        OperationOutcome::Failed(error)
    }

    async fn query_distribution(&mut self, field: SystemField) -> OperationOutcome {
        self.result.queries += 1;
        match self.service.distribution(field).await {
            Ok(served) => {
                let truth = self.truth_distribution(field).await;
                if *served != truth {
                    self.violation(format!(
                        "distribution({}) served {:?}, tables give {:?}",
                        field, served.buckets, truth.buckets
                    ));
                }
                OperationOutcome::Success
            }
            Err(e) => self.query_failed(distribution_key(field), e.to_string()),
        }
    }

    async fn query_totals(&mut self) -> OperationOutcome {
        self.result.queries += 1;
        let config = self.service.config().clone();
        match self.service.totals().await {
            Ok(served) => {
                match read_totals(&self.tables, &config.totals_family, &config.totals_counters).await {
                    Ok(truth) if *served == truth => {}
                    Ok(truth) => self.violation(format!(
                        "totals served {:?}, tables give {:?}",
                        served.counters, truth.counters
                    )),
                    Err(e) => self.violation(format!("unfaulted totals read failed: {}", e)),
                }
                OperationOutcome::Success
            }
            Err(e) => self.query_failed(totals_key(&config.totals_family), e.to_string()),
        }
    }

    async fn query_cohorts(&mut self) -> OperationOutcome {
        self.result.queries += 1;
        match self.service.cohort_statistics().await {
            Ok(served) => {
                let cohorts = self.service.config().cohorts.clone();
                let truth = compute_cohort_statistics(&self.tables, &cohorts).await;
                for stats in &served.cohorts {
                    if truth.cohort(&stats.cohort_name) != Some(stats) {
                        self.violation(format!(
                            "cohort {} served {:?}, tables give {:?}",
                            stats.cohort_name,
                            stats,
                            truth.cohort(&stats.cohort_name)
                        ));
                    }
                }
                if served.cohorts.len() + served.failures.len() != cohorts.len() {
                    self.violation(format!(
                        "cohort report covers {} of {} cohorts",
                        served.cohorts.len() + served.failures.len(),
                        cohorts.len()
                    ));
                }
                if !served.is_complete() {
                    if !self.config.faults_enabled() {
                        self.violation("cohort failures without faults".to_string());
                    }
                    if self.service.entry_state(&cohort_statistics_key()) == EntryState::Fresh {
                        self.violation("partial cohort report cached as Fresh".to_string());
                    }
                }
                OperationOutcome::Success
            }
            Err(e) => self.query_failed(cohort_statistics_key(), e.to_string()),
        }
    }

    async fn burst(&mut self, field: SystemField, callers: usize) -> OperationOutcome {
        self.result.queries += callers as u64;
        let before = self.service.cache_stats();

        let futures = (0..callers).map(|_| self.service.distribution(field));
        let results = futures::future::join_all(futures).await;

        let after = self.service.cache_stats();
        let started = after.misses - before.misses;
        if started > 1 {
            self.violation(format!(
                "burst of {} on {} started {} computations",
                callers, field, started
            ));
        }

        let first = results[0].clone();
        for result in &results[1..] {
            if result.is_ok() != first.is_ok() {
                self.violation(format!("burst on {} delivered mixed outcomes", field));
                break;
            }
        }

        match first {
            Ok(served) => {
                let truth = self.truth_distribution(field).await;
                if *served != truth {
                    self.violation(format!("burst distribution({}) diverged from tables", field));
                }
                OperationOutcome::Success
            }
            Err(e) => self.query_failed(distribution_key(field), e.to_string()),
        }
    }

    async fn truth_distribution(&self, field: SystemField) -> crate::model::Distribution {
        let records = match self.tables.active_organizations(Some(field)).await {
            Ok(records) => records,
            Err(_) => Vec::new(),
        };
        bucket_distribution(field, &records)
    }

    /// Check end-of-run invariants
    pub fn check_invariants(&mut self) {
        let stats = self.service.cache_stats();
        if stats.misses != stats.computations + stats.failures {
            self.violation(format!(
                "{} misses but {} computations + {} failures",
                stats.misses, stats.computations, stats.failures
            ));
        }
        if let Some(status) = self.service.subscriber_status() {
            if status.is_degraded() {
                self.violation(format!("subscriber degraded: {:?}", status.degraded));
            }
        }
        self.result.store_stats = self.store.stats();
    }

    pub fn result(&self) -> &AnalyticsDSTResult {
        &self.result
    }

    pub fn into_result(self) -> AnalyticsDSTResult {
        self.result
    }
}

/// Run a batch of DST tests with different seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: impl Fn(u64) -> AnalyticsDSTConfig,
) -> Vec<AnalyticsDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = AnalyticsDSTHarness::new(config_fn(seed)).await;
        harness.run(ops_per_run).await;
        harness.check_invariants();
        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[AnalyticsDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let total_queries: u64 = results.iter().map(|r| r.queries).sum();
    let total_failed: u64 = results.iter().map(|r| r.failed_queries).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} total ops, {} queries, {} failed queries",
        passed, total, total_ops, total_queries, total_failed
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dst_harness_calm() {
        let mut harness = AnalyticsDSTHarness::new(AnalyticsDSTConfig::calm(42)).await;
        harness.run(200).await;
        harness.check_invariants();

        let result = harness.result();
        assert!(
            result.is_success(),
            "Calm mode should not have invariant violations: {:?}",
            result.invariant_violations
        );
        assert_eq!(result.failed_queries, 0);
        assert_eq!(result.total_operations, 200);
    }

    #[tokio::test]
    async fn test_dst_harness_with_faults() {
        let mut harness = AnalyticsDSTHarness::new(AnalyticsDSTConfig::chaos(7)).await;
        harness.run(300).await;
        harness.check_invariants();

        let result = harness.result();
        assert!(result.is_success(), "{:?}", result.invariant_violations);
        println!("{}", result.summary());
    }

    #[tokio::test]
    async fn test_dst_deterministic() {
        let seed = 12345;

        let mut a = AnalyticsDSTHarness::new(AnalyticsDSTConfig::moderate(seed)).await;
        a.run(100).await;
        let mut b = AnalyticsDSTHarness::new(AnalyticsDSTConfig::moderate(seed)).await;
        b.run(100).await;

        assert_eq!(a.result().failed_queries, b.result().failed_queries);
        assert_eq!(a.result().mutations, b.result().mutations);
        let outcomes_a: Vec<_> = a.result().history.iter().map(|r| r.outcome.clone()).collect();
        let outcomes_b: Vec<_> = b.result().history.iter().map(|r| r.outcome.clone()).collect();
        assert_eq!(outcomes_a, outcomes_b, "Same seed should produce same history");
    }

    #[test]
    fn test_workload_generator_mix() {
        let config = AnalyticsDSTConfig::new(42);
        let mut workload = AnalyticsWorkload::new(config, AnalyticsConfig::default().cohorts);

        let mut queries = 0;
        let mut mutations = 0;
        for _ in 0..1000 {
            match workload.next_operation() {
                AnalyticsOperation::QueryDistribution(_)
                | AnalyticsOperation::QueryTotals
                | AnalyticsOperation::QueryCohorts
                | AnalyticsOperation::Burst { .. } => queries += 1,
                AnalyticsOperation::UpsertOrganization(_)
                | AnalyticsOperation::RemoveOrganization(_)
                | AnalyticsOperation::AddMembership(_)
                | AnalyticsOperation::UpsertProfile(_)
                | AnalyticsOperation::SetAggregate(_) => mutations += 1,
                _ => {}
            }
        }

        assert!(queries > 300, "queries = {}", queries);
        assert!(mutations > 200, "mutations = {}", mutations);
    }
}
