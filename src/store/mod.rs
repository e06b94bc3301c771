//! Directory Record Store Abstraction
//!
//! Read-only view of the directory tables the analytics engine aggregates
//! over. Follows the boxed-future trait pattern so implementations can be
//! swapped between production backends, in-memory tables and the fault
//! injecting simulator.
//!
//! Implementations:
//! - `InMemoryRecordStore`: For unit tests, DST and the demo binary
//! - `SimulatedRecordStore`: Wraps another store and injects faults

mod memory;
mod simulated;

pub use memory::InMemoryRecordStore;
pub use simulated::{SimulatedRecordStore, SimulatedStoreConfig, SimulatedStoreStats};

use crate::feed::Table;
use crate::model::{
    CohortMembership, OrganizationRecord, PrecomputedAggregate, Profile, SystemField,
};
use std::future::Future;
use std::pin::Pin;

/// Error type for record store reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable or refused the query
    Unavailable { table: Table, message: String },
    /// Query did not complete in time
    Timeout { table: Table },
    /// Any other backend failure
    Other { table: Table, message: String },
}

impl StoreError {
    pub fn table(&self) -> Table {
        match self {
            StoreError::Unavailable { table, .. }
            | StoreError::Timeout { table }
            | StoreError::Other { table, .. } => *table,
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable { table, message } => {
                write!(f, "Store unavailable reading {}: {}", table, message)
            }
            StoreError::Timeout { table } => write!(f, "Store timeout reading {}", table),
            StoreError::Other { table, message } => {
                write!(f, "Store error reading {}: {}", table, message)
            }
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

/// Boxed future returned by every store read
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Read interface over the directory tables
pub trait RecordStore: Send + Sync + 'static {
    /// Organizations with membership status = active.
    /// With a projection, only that system field is populated.
    fn active_organizations<'a>(
        &'a self,
        projection: Option<SystemField>,
    ) -> StoreFuture<'a, Vec<OrganizationRecord>>;

    /// Active organizations whose name is in `names`
    fn active_organizations_by_name<'a>(
        &'a self,
        names: &'a [String],
    ) -> StoreFuture<'a, Vec<OrganizationRecord>>;

    /// Membership rows tagged with `cohort`
    fn cohort_memberships<'a>(&'a self, cohort: &'a str) -> StoreFuture<'a, Vec<CohortMembership>>;

    /// Profiles for the given user ids
    fn profiles_by_user_ids<'a>(&'a self, user_ids: &'a [String]) -> StoreFuture<'a, Vec<Profile>>;

    /// Snapshot rows belonging to `family`
    fn precomputed_aggregates<'a>(
        &'a self,
        family: &'a str,
    ) -> StoreFuture<'a, Vec<PrecomputedAggregate>>;
}
