//! Change Notification Feed
//!
//! Abstraction over the directory store's change stream. A consumer
//! subscribes per table under a channel id that is unique to the consumer
//! instance; events carry no payload beyond "this table changed".
//!
//! Implementations:
//! - `InMemoryChangeFeed`: in-process broker for tests, DST and the demo
//!
//! `ChangeSubscriber` turns the feed into cache invalidations.

mod memory;
mod subscriber;

pub use memory::InMemoryChangeFeed;
pub use subscriber::{invalidation_targets, ChangeSubscriber, Invalidate, SubscriberStatus};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Directory tables the engine reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Organizations,
    PrecomputedAggregates,
    CohortMemberships,
    Profiles,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Organizations,
        Table::PrecomputedAggregates,
        Table::CohortMemberships,
        Table::Profiles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Organizations => "organizations",
            Table::PrecomputedAggregates => "precomputed_aggregates",
            Table::CohortMemberships => "cohort_memberships",
            Table::Profiles => "profiles",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Notification that something in `table` changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    /// Feed-wide publish sequence
    pub sequence: u64,
}

static NEXT_CHANNEL_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Channel identifier, unique per subscriber instance within the process
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId {
    pub consumer: String,
    pub instance: u64,
}

impl ChannelId {
    /// Allocate a fresh id for `consumer`
    pub fn next(consumer: impl Into<String>) -> Self {
        let instance = NEXT_CHANNEL_INSTANCE.fetch_add(1, Ordering::Relaxed);
        debug_assert!(instance > 0, "Channel instance counter wrapped");
        ChannelId {
            consumer: consumer.into(),
            instance,
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.consumer, self.instance)
    }
}

/// Error type for change feed operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// The (table, channel) pair already has a live subscription
    ChannelInUse(String),
    /// The backend refused the subscription
    Rejected(String),
    /// The feed has shut down
    Closed,
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::ChannelInUse(channel) => write!(f, "Channel already subscribed: {}", channel),
            FeedError::Rejected(msg) => write!(f, "Subscription rejected: {}", msg),
            FeedError::Closed => write!(f, "Change feed closed"),
        }
    }
}

impl std::error::Error for FeedError {}

/// Stream of change events for one (table, channel) subscription
pub type ChangeStream = mpsc::UnboundedReceiver<ChangeEvent>;

/// Change notification abstraction
pub trait ChangeFeed: Send + Sync + 'static {
    /// Open a subscription for `table` under `channel`
    fn subscribe<'a>(
        &'a self,
        table: Table,
        channel: &'a ChannelId,
    ) -> Pin<Box<dyn Future<Output = Result<ChangeStream, FeedError>> + Send + 'a>>;

    /// Drop every subscription registered under `channel`.
    /// Returns the number of subscriptions removed.
    fn unsubscribe(&self, channel: &ChannelId) -> usize;
}
