//! Organization-directory analytics engine
//!
//! Categorical distributions, precomputed totals and cohort statistics over
//! directory records, served through a single-flight query cache that is
//! invalidated by the store's change feed.

pub mod aggregate;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dst;
pub mod error;
pub mod feed;
pub mod model;
pub mod service;
pub mod store;

#[cfg(test)]
mod stateright;

pub use cache::{CachePolicy, CacheStats, EntryState, InvalidationTarget, QueryCache, QueryKey};
pub use clock::{CacheClock, ProductionClock, SimulatedClock};
pub use config::AnalyticsConfig;
pub use error::{AnalyticsError, AnalyticsResult};
pub use feed::{ChangeFeed, ChangeSubscriber, InMemoryChangeFeed, Table};
pub use model::{CohortReport, CohortStatistics, Distribution, SystemField, Totals};
pub use service::{AggregateView, AnalyticsService};
pub use store::{InMemoryRecordStore, RecordStore, SimulatedRecordStore};
