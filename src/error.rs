//! Analytics Error Taxonomy
//!
//! Every query surfaces one of these. Errors are `Clone` because a single
//! in-flight computation may deliver the same failure to many coalesced
//! waiters.

use crate::feed::{FeedError, Table};
use crate::store::StoreError;

/// Error type for analytics queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsError {
    /// The record store could not be read
    SourceUnavailable {
        /// Logical source that failed (table or query stage)
        source_name: String,
        message: String,
    },
    /// One sub-unit of a batch (e.g. one cohort) failed while others succeeded
    PartialComputationFailure { unit: String, message: String },
    /// A change subscription could not be established
    Subscription { table: Table, message: String },
    /// A system field name outside the permitted set
    UnknownField(String),
    /// The in-flight computation ended without producing a result
    ComputationAborted(String),
    /// Invalid configuration
    Config(String),
}

impl AnalyticsError {
    pub fn source_unavailable(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        AnalyticsError::SourceUnavailable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Whether a caller may retry the same query and expect a different outcome
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AnalyticsError::SourceUnavailable { .. }
                | AnalyticsError::PartialComputationFailure { .. }
                | AnalyticsError::ComputationAborted(_)
        )
    }
}

impl std::fmt::Display for AnalyticsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalyticsError::SourceUnavailable {
                source_name,
                message,
            } => write!(f, "Aggregation source unavailable ({}): {}", source_name, message),
            AnalyticsError::PartialComputationFailure { unit, message } => {
                write!(f, "Computation failed for {}: {}", unit, message)
            }
            AnalyticsError::Subscription { table, message } => {
                write!(f, "Subscription to {} failed: {}", table, message)
            }
            AnalyticsError::UnknownField(name) => write!(f, "Unknown system field: {}", name),
            AnalyticsError::ComputationAborted(key) => {
                write!(f, "Computation aborted before completion: {}", key)
            }
            AnalyticsError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AnalyticsError {}

impl From<StoreError> for AnalyticsError {
    fn from(e: StoreError) -> Self {
        AnalyticsError::SourceUnavailable {
            source_name: e.table().to_string(),
            message: e.to_string(),
        }
    }
}

impl AnalyticsError {
    pub fn subscription(table: Table, e: FeedError) -> Self {
        AnalyticsError::Subscription {
            table,
            message: e.to_string(),
        }
    }
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;
