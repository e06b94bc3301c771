//! Change subscriber
//!
//! Bridges a `ChangeFeed` to cache invalidation.
//!
//! ```text
//! feed ──(table, channel)──► forwarding task ──► invalidation_targets(table)
//!                                                      │
//!                                                      ▼
//!                                              Invalidate::invalidate
//! ```
//!
//! One channel id is allocated per subscriber instance and every table is
//! subscribed under it, so teardown is a single `unsubscribe`. Teardown
//! happens on `shutdown()` or on drop, whichever comes first.
//!
//! A table whose subscription cannot be opened, or whose stream closes
//! unexpectedly, is marked degraded: its queries then rely on freshness
//! expiry alone.

use super::{ChangeFeed, ChannelId, Table};
use crate::cache::{
    InvalidationTarget, QueryCache, COHORT_STATISTICS_QUERY, DISTRIBUTION_QUERY, TOTALS_QUERY,
};
use crate::clock::CacheClock;
use crate::error::AnalyticsError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Anything that can mark cached results stale
pub trait Invalidate: Send + Sync + 'static {
    fn invalidate(&self, target: &InvalidationTarget) -> usize;
}

impl<V, C> Invalidate for QueryCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: CacheClock,
{
    fn invalidate(&self, target: &InvalidationTarget) -> usize {
        QueryCache::invalidate(self, target)
    }
}

/// Queries whose results can be derived from `table`
pub fn invalidation_targets(table: Table) -> Vec<InvalidationTarget> {
    match table {
        Table::Organizations => vec![
            InvalidationTarget::query(DISTRIBUTION_QUERY),
            InvalidationTarget::query(COHORT_STATISTICS_QUERY),
        ],
        Table::PrecomputedAggregates => vec![InvalidationTarget::query(TOTALS_QUERY)],
        Table::CohortMemberships | Table::Profiles => {
            vec![InvalidationTarget::query(COHORT_STATISTICS_QUERY)]
        }
    }
}

/// Snapshot of a subscriber's health
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberStatus {
    pub channel: ChannelId,
    /// Tables with a live subscription
    pub subscribed: Vec<Table>,
    /// Tables that fell back to expiry-only invalidation, with the cause
    pub degraded: Vec<(Table, AnalyticsError)>,
    pub events_received: u64,
}

impl SubscriberStatus {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

struct SubscriberShared {
    subscribed: Mutex<Vec<Table>>,
    degraded: Mutex<Vec<(Table, AnalyticsError)>>,
    events_received: AtomicU64,
    stopping: AtomicBool,
}

impl SubscriberShared {
    fn degrade(&self, table: Table, error: AnalyticsError) {
        self.subscribed.lock().retain(|t| *t != table);
        self.degraded.lock().push((table, error));
    }
}

/// Owns one channel's subscriptions and their forwarding tasks
pub struct ChangeSubscriber {
    feed: Arc<dyn ChangeFeed>,
    channel: ChannelId,
    shared: Arc<SubscriberShared>,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl ChangeSubscriber {
    /// Subscribe `tables` under a fresh channel for `consumer`.
    ///
    /// Never fails: tables that cannot be subscribed are reported through
    /// `status()` and logged.
    pub async fn start<I>(
        feed: Arc<dyn ChangeFeed>,
        sink: I,
        consumer: &str,
        tables: &[Table],
    ) -> Self
    where
        I: Invalidate + Clone,
    {
        let channel = ChannelId::next(consumer);
        let shared = Arc::new(SubscriberShared {
            subscribed: Mutex::new(Vec::with_capacity(tables.len())),
            degraded: Mutex::new(Vec::new()),
            events_received: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
        });
        let mut tasks = Vec::with_capacity(tables.len());

        for &table in tables {
            match feed.subscribe(table, &channel).await {
                Ok(mut stream) => {
                    shared.subscribed.lock().push(table);
                    let sink = sink.clone();
                    let shared = shared.clone();
                    let channel_name = channel.to_string();

                    tasks.push(tokio::spawn(async move {
                        let targets = invalidation_targets(table);
                        while let Some(event) = stream.recv().await {
                            let affected: usize = targets.iter().map(|t| sink.invalidate(t)).sum();
                            shared.events_received.fetch_add(1, Ordering::Release);
                            debug!(
                                channel = %channel_name,
                                table = %event.table,
                                kind = ?event.kind,
                                sequence = event.sequence,
                                affected,
                                "Change event applied"
                            );
                        }

                        if !shared.stopping.load(Ordering::Acquire) {
                            warn!(channel = %channel_name, table = %table, "Change stream closed, falling back to expiry");
                            shared.degrade(
                                table,
                                AnalyticsError::Subscription {
                                    table,
                                    message: "stream closed".to_string(),
                                },
                            );
                        }
                    }));
                }
                Err(e) => {
                    warn!(channel = %channel, table = %table, error = %e, "Subscription failed, falling back to expiry");
                    shared.degraded.lock().push((table, AnalyticsError::subscription(table, e)));
                }
            }
        }

        info!(
            channel = %channel,
            subscribed = shared.subscribed.lock().len(),
            degraded = shared.degraded.lock().len(),
            "Change subscriber started"
        );

        ChangeSubscriber {
            feed,
            channel,
            shared,
            tasks,
            closed: false,
        }
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn status(&self) -> SubscriberStatus {
        SubscriberStatus {
            channel: self.channel.clone(),
            subscribed: self.shared.subscribed.lock().clone(),
            degraded: self.shared.degraded.lock().clone(),
            events_received: self.shared.events_received.load(Ordering::Acquire),
        }
    }

    /// Unsubscribe and stop forwarding. Idempotent.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.stopping.store(true, Ordering::Release);

        let removed = self.feed.unsubscribe(&self.channel);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.shared.subscribed.lock().clear();
        info!(channel = %self.channel, removed, "Change subscriber shut down");
    }
}

impl Drop for ChangeSubscriber {
    fn drop(&mut self) {
        self.shutdown();
    }
}
