//! Aggregate DTOs returned to consumers

use super::system_field::SystemField;
use crate::error::AnalyticsError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of a bucketed distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub count: u64,
}

impl Bucket {
    pub fn new(name: impl Into<String>, count: u64) -> Self {
        Bucket {
            name: name.into(),
            count,
        }
    }
}

/// Bucketed distribution of one system field over active organizations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub field: SystemField,
    /// Sorted by count, descending
    pub buckets: Vec<Bucket>,
}

impl Distribution {
    /// Number of active records with a non-empty value for the field
    pub fn total(&self) -> u64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    pub fn bucket(&self, name: &str) -> Option<&Bucket> {
        self.buckets.iter().find(|b| b.name == name)
    }
}

/// Counters read from the precomputed snapshot for one family
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub family: String,
    pub counters: BTreeMap<String, i64>,
}

impl Totals {
    /// Counter value, 0 when the snapshot row is absent
    pub fn get(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

/// Per-organization breakdown inside a cohort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortOrganization {
    pub id: String,
    pub name: String,
    pub member_count: u64,
}

/// Statistics for one cohort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortStatistics {
    pub cohort_name: String,
    pub organization_count: u64,
    /// Profiles fetched, including those whose organization did not resolve
    pub member_count: u64,
    pub organizations: Vec<CohortOrganization>,
}

impl CohortStatistics {
    pub fn empty(cohort_name: impl Into<String>) -> Self {
        CohortStatistics {
            cohort_name: cohort_name.into(),
            organization_count: 0,
            member_count: 0,
            organizations: Vec::new(),
        }
    }
}

/// A cohort that could not be computed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortFailure {
    pub cohort_name: String,
    pub error: AnalyticsError,
}

/// Result of one cohort statistics run
///
/// A cohort missing from `cohorts` failed; it is never reported as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CohortReport {
    pub cohorts: Vec<CohortStatistics>,
    pub failures: Vec<CohortFailure>,
}

impl CohortReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn cohort(&self, name: &str) -> Option<&CohortStatistics> {
        self.cohorts.iter().find(|c| c.cohort_name == name)
    }
}
