//! Analytics Service
//!
//! Consumer-facing query surface. Every query goes through the owned
//! `QueryCache`; nothing here is a process-wide singleton.
//!
//! ```text
//! distribution(field) ─┐
//! totals()            ─┼─► QueryCache::get ──miss──► aggregator ──► RecordStore
//! cohort_statistics() ─┘          ▲
//!                                 │ invalidate
//!                          ChangeSubscriber ◄── ChangeFeed
//! ```
//!
//! Lifecycle: `new` starts with an empty cache; `shutdown` stops the sweeper,
//! unsubscribes and drops every entry.

use crate::aggregate::{compute_cohort_statistics, compute_distribution, read_totals};
use crate::cache::{
    CacheStats, CacheSweeper, Computed, EntryState, InvalidationTarget, QueryCache, QueryKey,
    SweeperHandle, COHORT_STATISTICS_QUERY, DISTRIBUTION_QUERY, TOTALS_QUERY,
};
use crate::clock::{CacheClock, ProductionClock};
use crate::config::AnalyticsConfig;
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::feed::{ChangeFeed, ChangeSubscriber, SubscriberStatus};
use crate::model::{CohortReport, CohortStatistics, Distribution, SystemField, Totals};
use crate::store::RecordStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

pub fn distribution_key(field: SystemField) -> QueryKey {
    QueryKey::new(DISTRIBUTION_QUERY).with_param(field.as_str())
}

pub fn totals_key(family: &str) -> QueryKey {
    QueryKey::new(TOTALS_QUERY).with_param(family)
}

pub fn cohort_statistics_key() -> QueryKey {
    QueryKey::new(COHORT_STATISTICS_QUERY)
}

/// Cached value; one variant per query
#[derive(Debug, Clone)]
enum Aggregate {
    Distribution(Arc<Distribution>),
    Totals(Arc<Totals>),
    Cohorts(Arc<CohortReport>),
}

fn mismatched(key: &QueryKey) -> AnalyticsError {
    AnalyticsError::ComputationAborted(format!("{} cached under another query type", key))
}

pub struct AnalyticsService<C: CacheClock = ProductionClock> {
    store: Arc<dyn RecordStore>,
    cache: QueryCache<Aggregate, C>,
    config: AnalyticsConfig,
    subscriber: Option<ChangeSubscriber>,
    sweeper: Option<SweeperHandle>,
}

impl AnalyticsService<ProductionClock> {
    pub fn new(store: Arc<dyn RecordStore>, config: AnalyticsConfig) -> Self {
        Self::with_clock(store, config, ProductionClock::new())
    }

    /// Service that also invalidates from `feed`
    pub async fn with_change_feed(
        store: Arc<dyn RecordStore>,
        config: AnalyticsConfig,
        feed: Arc<dyn ChangeFeed>,
    ) -> Self {
        let mut service = Self::new(store, config);
        service.attach_change_feed(feed).await;
        service
    }
}

impl<C: CacheClock> AnalyticsService<C> {
    pub fn with_clock(store: Arc<dyn RecordStore>, config: AnalyticsConfig, clock: C) -> Self {
        AnalyticsService {
            store,
            cache: QueryCache::with_clock(clock),
            config,
            subscriber: None,
            sweeper: None,
        }
    }

    /// Subscribe the configured tables. Replaces any previous subscriber.
    pub async fn attach_change_feed(&mut self, feed: Arc<dyn ChangeFeed>) -> SubscriberStatus {
        let subscriber = ChangeSubscriber::start(
            feed,
            self.cache.clone(),
            &self.config.subscriber.consumer,
            &self.config.subscriber.watched_tables,
        )
        .await;
        let status = subscriber.status();
        if status.is_degraded() {
            warn!(
                channel = %status.channel,
                degraded = status.degraded.len(),
                "Some tables rely on expiry-only invalidation"
            );
        }
        // Dropping the previous subscriber unsubscribes it
        self.subscriber = Some(subscriber);
        status
    }

    /// Start the periodic retention sweep. No-op if already running.
    pub fn start_sweeper(&mut self) {
        if self.sweeper.is_none() {
            self.sweeper = Some(CacheSweeper::spawn(
                self.cache.clone(),
                self.config.cache.sweep_interval,
            ));
        }
    }

    pub async fn distribution(&self, field: SystemField) -> AnalyticsResult<Arc<Distribution>> {
        let key = distribution_key(field);
        let store = self.store.clone();
        let value = self
            .cache
            .get(key.clone(), self.config.cache.distribution, move || async move {
                compute_distribution(store.as_ref(), field)
                    .await
                    .map(|d| Aggregate::Distribution(Arc::new(d)))
            })
            .await?;

        match value {
            Aggregate::Distribution(d) => Ok(d),
            _ => Err(mismatched(&key)),
        }
    }

    /// Distribution for a field named at the boundary (e.g. a request path)
    pub async fn distribution_by_name(&self, field: &str) -> AnalyticsResult<Arc<Distribution>> {
        let field: SystemField = field.parse()?;
        self.distribution(field).await
    }

    pub async fn totals(&self) -> AnalyticsResult<Arc<Totals>> {
        let key = totals_key(&self.config.totals_family);
        let store = self.store.clone();
        let family = self.config.totals_family.clone();
        let expected = self.config.totals_counters.clone();
        let value = self
            .cache
            .get(key.clone(), self.config.cache.totals, move || async move {
                read_totals(store.as_ref(), &family, &expected)
                    .await
                    .map(|t| Aggregate::Totals(Arc::new(t)))
            })
            .await?;

        match value {
            Aggregate::Totals(t) => Ok(t),
            _ => Err(mismatched(&key)),
        }
    }

    /// Statistics for every configured cohort.
    ///
    /// Failed cohorts are listed in `failures` and absent from `cohorts`.
    /// A report with failures is cached stale so the next call retries.
    pub async fn cohort_statistics(&self) -> AnalyticsResult<Arc<CohortReport>> {
        let key = cohort_statistics_key();
        let store = self.store.clone();
        let cohorts = self.config.cohorts.clone();
        let value = self
            .cache
            .get_computed(key.clone(), self.config.cache.cohort_statistics, move || async move {
                let report = compute_cohort_statistics(store.as_ref(), &cohorts).await;
                let complete = report.is_complete();
                let value = Aggregate::Cohorts(Arc::new(report));
                Ok(if complete {
                    Computed::complete(value)
                } else {
                    Computed::incomplete(value)
                })
            })
            .await?;

        match value {
            Aggregate::Cohorts(report) => Ok(report),
            _ => Err(mismatched(&key)),
        }
    }

    pub fn invalidate(&self, target: &InvalidationTarget) -> usize {
        self.cache.invalidate(target)
    }

    /// Run one retention sweep immediately
    pub fn evict_expired(&self) -> usize {
        self.cache.evict_expired()
    }

    pub fn entry_state(&self, key: &QueryKey) -> EntryState {
        self.cache.peek_state(key)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn subscriber_status(&self) -> Option<SubscriberStatus> {
        self.subscriber.as_ref().map(|s| s.status())
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        self.cache.clock()
    }

    /// Stop background work, unsubscribe and drop every cache entry
    pub async fn shutdown(&mut self) {
        if let Some(mut subscriber) = self.subscriber.take() {
            subscriber.shutdown();
        }
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown().await;
        }
        self.cache.clear();
        info!("Analytics service shut down");
    }
}

/// What a consumer renders: the value, or an empty one plus an error.
///
/// A failed query never renders as silently wrong data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateView<T> {
    pub value: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> AggregateView<T> {
    pub fn from_result(result: AnalyticsResult<T>, empty: T) -> Self {
        match result {
            Ok(value) => AggregateView { value, error: None },
            Err(e) => AggregateView {
                value: empty,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl AggregateView<Distribution> {
    pub fn distribution(field: SystemField, result: AnalyticsResult<Arc<Distribution>>) -> Self {
        let empty = Distribution {
            field,
            buckets: Vec::new(),
        };
        Self::from_result(result.map(|d| d.as_ref().clone()), empty)
    }
}

impl AggregateView<Totals> {
    pub fn totals(result: AnalyticsResult<Arc<Totals>>) -> Self {
        Self::from_result(result.map(|t| t.as_ref().clone()), Totals::default())
    }
}

impl AggregateView<Vec<CohortStatistics>> {
    /// Successful cohorts, with failed ones named in the error
    pub fn cohorts(result: AnalyticsResult<Arc<CohortReport>>) -> Self {
        match result {
            Ok(report) => {
                let error = if report.is_complete() {
                    None
                } else {
                    let names: Vec<&str> =
                        report.failures.iter().map(|f| f.cohort_name.as_str()).collect();
                    Some(format!("Cohort statistics unavailable for: {}", names.join(", ")))
                };
                AggregateView {
                    value: report.cohorts.clone(),
                    error,
                }
            }
            Err(e) => AggregateView {
                value: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }
}
