//! Categorical bucketing of system field values
//!
//! Values held by fewer than `SMALL_BUCKET_THRESHOLD` organizations are
//! folded into a single synthetic `"Other"` bucket so that distributions stay
//! readable and small vendors are not individually identifiable.

use crate::error::AnalyticsResult;
use crate::model::{Bucket, Distribution, OrganizationRecord, SystemField};
use crate::store::RecordStore;
use ahash::AHashMap;
use tracing::debug;

/// Minimum count for a value to be reported under its own name
pub const SMALL_BUCKET_THRESHOLD: u64 = 11;

/// Name of the synthetic bucket holding every small value
pub const OTHER_BUCKET: &str = "Other";

/// Tally values and collapse small counts into `"Other"`.
///
/// Values are tallied exactly as stored; only empty and whitespace-only
/// values are skipped. A vendor literally named `"Other"` lands in the single
/// `"Other"` entry whatever its count, so names in the output are unique.
/// Output is sorted by count descending; ties keep the order in which values
/// were first encountered.
pub fn bucket_values<'a, I>(values: I) -> Vec<Bucket>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut order: Vec<(&'a str, u64)> = Vec::new();
    let mut index: AHashMap<&'a str, usize> = AHashMap::new();

    for value in values {
        if value.trim().is_empty() {
            continue;
        }
        match index.get(value) {
            Some(&slot) => order[slot].1 += 1,
            None => {
                index.insert(value, order.len());
                order.push((value, 1));
            }
        }
    }

    let mut other_count = 0u64;
    let mut buckets: Vec<Bucket> = Vec::with_capacity(order.len() + 1);
    for (value, count) in order {
        if count >= SMALL_BUCKET_THRESHOLD && value != OTHER_BUCKET {
            buckets.push(Bucket::new(value, count));
        } else {
            other_count += count;
        }
    }

    if other_count > 0 {
        buckets.push(Bucket::new(OTHER_BUCKET, other_count));
    }

    // Vec::sort_by is stable, which preserves encounter order on ties.
    buckets.sort_by(|a, b| b.count.cmp(&a.count));
    buckets
}

/// Bucketed distribution of `field` over the active records in `records`
pub fn bucket_distribution(field: SystemField, records: &[OrganizationRecord]) -> Distribution {
    let buckets = bucket_values(
        records
            .iter()
            .filter(|r| r.is_active())
            .filter_map(|r| r.system(field)),
    );
    Distribution { field, buckets }
}

/// Read active organizations and bucket `field`.
///
/// A store failure yields `SourceUnavailable`; there is no partial result.
pub async fn compute_distribution(
    store: &dyn RecordStore,
    field: SystemField,
) -> AnalyticsResult<Distribution> {
    let records = store.active_organizations(Some(field)).await?;
    let distribution = bucket_distribution(field, &records);
    debug!(
        field = %field,
        records = records.len(),
        buckets = distribution.buckets.len(),
        "Computed distribution"
    );
    Ok(distribution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MembershipStatus;

    fn repeat(value: &'static str, n: usize) -> impl Iterator<Item = &'static str> {
        std::iter::repeat(value).take(n)
    }

    #[test]
    fn test_reference_distribution() {
        let values: Vec<&str> = repeat("A", 12).chain(repeat("B", 11)).chain(repeat("C", 1)).collect();

        let buckets = bucket_values(values);
        assert_eq!(
            buckets,
            vec![Bucket::new("A", 12), Bucket::new("B", 11), Bucket::new("Other", 1)]
        );
    }

    #[test]
    fn test_no_other_when_all_values_large() {
        let buckets = bucket_values(repeat("A", 11).chain(repeat("B", 20)));
        assert_eq!(buckets, vec![Bucket::new("B", 20), Bucket::new("A", 11)]);
    }

    #[test]
    fn test_other_sorted_by_its_sum() {
        // Ten small vendors of 3 each sum to 30, ahead of A's 12
        let mut values: Vec<&str> = repeat("A", 12).collect();
        for vendor in ["v0", "v1", "v2", "v3", "v4", "v5", "v6", "v7", "v8", "v9"] {
            values.extend(repeat(vendor, 3));
        }

        let buckets = bucket_values(values);
        assert_eq!(buckets, vec![Bucket::new("Other", 30), Bucket::new("A", 12)]);
    }

    #[test]
    fn test_ties_keep_encounter_order() {
        let values: Vec<&str> = repeat("Zeta", 11)
            .chain(repeat("Alpha", 11))
            .chain(repeat("Mid", 11))
            .collect();

        let names: Vec<String> = bucket_values(values).into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["Zeta", "Alpha", "Mid"]);
    }

    #[test]
    fn test_blank_values_excluded() {
        let mut values: Vec<&str> = vec!["", "   ", "\t"];
        values.extend(repeat("Workday", 11));

        let buckets = bucket_values(values);
        assert_eq!(buckets, vec![Bucket::new("Workday", 11)]);
    }

    #[test]
    fn test_padded_values_tallied_as_stored() {
        let values: Vec<&str> = repeat(" Workday ", 6).chain(repeat("Workday", 6)).collect();

        let buckets = bucket_values(values);
        assert_eq!(buckets, vec![Bucket::new("Other", 12)]);
    }

    #[test]
    fn test_vendor_named_other_merges_into_single_bucket() {
        let values: Vec<&str> = repeat("Other", 12).chain(repeat("X", 3)).collect();

        let buckets = bucket_values(values);
        assert_eq!(buckets, vec![Bucket::new("Other", 15)]);
    }

    #[test]
    fn test_small_vendor_named_other_counts_once() {
        let values: Vec<&str> = repeat("A", 11).chain(repeat("Other", 2)).chain(repeat("B", 1)).collect();

        let buckets = bucket_values(values);
        assert_eq!(buckets, vec![Bucket::new("A", 11), Bucket::new("Other", 3)]);
    }

    #[test]
    fn test_empty_input() {
        assert!(bucket_values(Vec::<&str>::new()).is_empty());
    }

    #[test]
    fn test_distribution_ignores_inactive_records() {
        let mut records = Vec::new();
        for i in 0..12 {
            records.push(
                OrganizationRecord::new(format!("a{}", i), format!("A{}", i), MembershipStatus::Active)
                    .with_system(SystemField::Payroll, "Workday"),
            );
        }
        for i in 0..5 {
            records.push(
                OrganizationRecord::new(format!("i{}", i), format!("I{}", i), MembershipStatus::Inactive)
                    .with_system(SystemField::Payroll, "Workday"),
            );
        }

        let dist = bucket_distribution(SystemField::Payroll, &records);
        assert_eq!(dist.buckets, vec![Bucket::new("Workday", 12)]);
        assert_eq!(dist.total(), 12);
    }
}
