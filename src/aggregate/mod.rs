//! Aggregators
//!
//! Pure computations over reads from a `RecordStore`. None of them cache;
//! the service runs them through `QueryCache`.
//!
//! - `categorical`: bucketed vendor distribution of one system field
//! - `totals`: counters from the precomputed snapshot table
//! - `cohort`: multi-stage join producing per-cohort statistics

pub mod categorical;
pub mod cohort;
pub mod totals;

pub use categorical::{
    bucket_distribution, bucket_values, compute_distribution, OTHER_BUCKET,
    SMALL_BUCKET_THRESHOLD,
};
pub use cohort::{compute_cohort, compute_cohort_statistics};
pub use totals::read_totals;
