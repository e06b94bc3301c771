use crate::error::AnalyticsResult;
use crate::model::Totals;
use crate::store::RecordStore;
use std::collections::BTreeMap;
use tracing::debug;

/// Read the snapshot counters of `family`.
///
/// Every name in `expected` is present in the result, defaulting to 0 when
/// the snapshot has no row for it. Rows beyond `expected` are passed through.
pub async fn read_totals(
    store: &dyn RecordStore,
    family: &str,
    expected: &[String],
) -> AnalyticsResult<Totals> {
    let rows = store.precomputed_aggregates(family).await?;

    let mut counters: BTreeMap<String, i64> =
        expected.iter().map(|name| (name.clone(), 0)).collect();
    for row in &rows {
        debug_assert_eq!(row.family, family, "Store returned a row from another family");
        counters.insert(row.name.clone(), row.count);
    }

    debug!(family, rows = rows.len(), counters = counters.len(), "Read precomputed totals");
    Ok(Totals {
        family: family.to_string(),
        counters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PrecomputedAggregate;
    use crate::store::InMemoryRecordStore;

    #[tokio::test]
    async fn test_absent_rows_default_to_zero() {
        let store = InMemoryRecordStore::new();
        store.set_aggregate(PrecomputedAggregate::new("organization_totals", "total_organizations", 412));
        store.set_aggregate(PrecomputedAggregate::new("other_family", "total_members", 9));

        let expected = vec!["total_organizations".to_string(), "total_members".to_string()];
        let totals = read_totals(&store, "organization_totals", &expected).await.unwrap();

        assert_eq!(totals.get("total_organizations"), 412);
        assert_eq!(totals.get("total_members"), 0);
        assert_eq!(totals.get("never_heard_of_it"), 0);
        assert_eq!(totals.counters.len(), 2);
    }

    #[tokio::test]
    async fn test_unexpected_rows_pass_through() {
        let store = InMemoryRecordStore::new();
        store.set_aggregate(PrecomputedAggregate::new("organization_totals", "total_weighted_headcount", 77));

        let totals = read_totals(&store, "organization_totals", &[]).await.unwrap();
        assert_eq!(totals.get("total_weighted_headcount"), 77);
        assert_eq!(totals.family, "organization_totals");
    }
}
