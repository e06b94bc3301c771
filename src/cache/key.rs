use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Query names shared by the service that builds keys and the change
/// subscriber that invalidates them
pub const DISTRIBUTION_QUERY: &str = "distribution";
pub const TOTALS_QUERY: &str = "totals";
pub const COHORT_STATISTICS_QUERY: &str = "cohort_statistics";

/// Identity of a cached query: name plus parameter tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    query: String,
    params: Vec<String>,
}

impl QueryKey {
    pub fn new(query: impl Into<String>) -> Self {
        QueryKey {
            query: query.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.query, self.params.join(","))
    }
}

/// Which entries an invalidation applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationTarget {
    /// Exactly one key
    Exact(QueryKey),
    /// Every key of the named query, whatever its parameters
    Query(String),
    /// Every entry
    All,
}

impl InvalidationTarget {
    pub fn query(name: impl Into<String>) -> Self {
        InvalidationTarget::Query(name.into())
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            InvalidationTarget::Exact(target) => target == key,
            InvalidationTarget::Query(name) => key.query == *name,
            InvalidationTarget::All => true,
        }
    }
}

impl std::fmt::Display for InvalidationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationTarget::Exact(key) => write!(f, "{}", key),
            InvalidationTarget::Query(name) => write!(f, "{}(*)", name),
            InvalidationTarget::All => write!(f, "*"),
        }
    }
}

/// Freshness and retention windows carried by each key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// After this long a stored value is stale even without invalidation
    #[serde(with = "crate::config::duration_millis")]
    pub freshness: Duration,
    /// After this long without access an entry is evicted outright
    #[serde(with = "crate::config::duration_millis")]
    pub retention: Duration,
}

impl CachePolicy {
    /// Retention is clamped so it never undercuts freshness
    pub fn new(freshness: Duration, retention: Duration) -> Self {
        CachePolicy {
            freshness,
            retention: retention.max(freshness),
        }
    }

    pub fn normalized(self) -> Self {
        Self::new(self.freshness, self.retention)
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy {
            freshness: Duration::from_secs(5 * 60),
            retention: Duration::from_secs(30 * 60),
        }
    }
}
