//! Cohort statistics
//!
//! Multi-stage join per cohort:
//!
//! ```text
//! memberships(cohort) → profiles(user ids) → active organizations(names)
//! ```
//!
//! Each cohort is computed independently. A failing cohort is logged and
//! left out of `CohortReport::cohorts`; it never fails the batch.
//!
//! Profiles are matched to organizations by organization *name*. Two active
//! organizations sharing a name both receive the matching members.

use crate::error::{AnalyticsError, AnalyticsResult};
use crate::model::{CohortFailure, CohortOrganization, CohortReport, CohortStatistics};
use crate::store::{RecordStore, StoreError};
use ahash::AHashSet;
use tracing::{debug, warn};

/// Join stage, used to label failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Memberships,
    Profiles,
    Organizations,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Memberships => "membership fetch",
            Stage::Profiles => "profile resolution",
            Stage::Organizations => "organization resolution",
        }
    }
}

fn stage_error(cohort: &str, stage: Stage, e: StoreError) -> AnalyticsError {
    AnalyticsError::PartialComputationFailure {
        unit: format!("cohort {}", cohort),
        message: format!("{} failed: {}", stage.as_str(), e),
    }
}

/// Order-preserving dedup
fn distinct<'a, I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = AHashSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(item) {
            out.push(item.to_string());
        }
    }
    out
}

/// Statistics for a single cohort
pub async fn compute_cohort(
    store: &dyn RecordStore,
    cohort: &str,
) -> AnalyticsResult<CohortStatistics> {
    let memberships = store
        .cohort_memberships(cohort)
        .await
        .map_err(|e| stage_error(cohort, Stage::Memberships, e))?;

    if memberships.is_empty() {
        debug!(cohort, "Cohort has no members");
        return Ok(CohortStatistics::empty(cohort));
    }

    let user_ids = distinct(memberships.iter().map(|m| m.user_id.as_str()));
    let profiles = store
        .profiles_by_user_ids(&user_ids)
        .await
        .map_err(|e| stage_error(cohort, Stage::Profiles, e))?;

    let org_names = distinct(
        profiles
            .iter()
            .filter_map(|p| p.organization.as_deref())
            .filter(|name| !name.trim().is_empty()),
    );

    let organizations = if org_names.is_empty() {
        Vec::new()
    } else {
        store
            .active_organizations_by_name(&org_names)
            .await
            .map_err(|e| stage_error(cohort, Stage::Organizations, e))?
    };

    let breakdown: Vec<CohortOrganization> = organizations
        .iter()
        .map(|org| {
            let member_count = profiles
                .iter()
                .filter(|p| p.organization.as_deref() == Some(org.name.as_str()))
                .count() as u64;
            CohortOrganization {
                id: org.id.clone(),
                name: org.name.clone(),
                member_count,
            }
        })
        .collect();

    let stats = CohortStatistics {
        cohort_name: cohort.to_string(),
        organization_count: breakdown.len() as u64,
        member_count: profiles.len() as u64,
        organizations: breakdown,
    };

    debug!(
        cohort,
        memberships = memberships.len(),
        members = stats.member_count,
        organizations = stats.organization_count,
        "Computed cohort statistics"
    );
    Ok(stats)
}

/// Statistics for every cohort in `cohorts`, computed concurrently.
///
/// Result order follows `cohorts`. Failed cohorts are reported in
/// `failures` and omitted from `cohorts`.
pub async fn compute_cohort_statistics(store: &dyn RecordStore, cohorts: &[String]) -> CohortReport {
    let results =
        futures::future::join_all(cohorts.iter().map(|name| compute_cohort(store, name))).await;

    let mut report = CohortReport::default();
    for (name, result) in cohorts.iter().zip(results) {
        match result {
            Ok(stats) => report.cohorts.push(stats),
            Err(error) => {
                warn!(cohort = %name, error = %error, "Cohort statistics failed, skipping");
                report.failures.push(CohortFailure {
                    cohort_name: name.clone(),
                    error,
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Table;
    use crate::model::{CohortMembership, MembershipStatus, OrganizationRecord, Profile};
    use crate::store::{InMemoryRecordStore, SimulatedRecordStore, SimulatedStoreConfig};

    fn reference_store() -> InMemoryRecordStore {
        let store = InMemoryRecordStore::new();
        store.add_membership(CohortMembership::new("u1", "Affairs"));
        store.upsert_profile(Profile::new("u1", "Una", Some("Acme")));
        store.upsert_organization(OrganizationRecord::new("o1", "Acme", MembershipStatus::Active));
        store
    }

    #[tokio::test]
    async fn test_reference_cohort() {
        let store = reference_store();
        let stats = compute_cohort(&store, "Affairs").await.unwrap();

        assert_eq!(
            stats,
            CohortStatistics {
                cohort_name: "Affairs".to_string(),
                organization_count: 1,
                member_count: 1,
                organizations: vec![CohortOrganization {
                    id: "o1".to_string(),
                    name: "Acme".to_string(),
                    member_count: 1,
                }],
            }
        );
    }

    #[tokio::test]
    async fn test_empty_cohort_is_zero_not_failure() {
        let store = reference_store();
        let cohorts = vec!["Affairs".to_string(), "Finance".to_string()];

        let report = compute_cohort_statistics(&store, &cohorts).await;
        assert!(report.is_complete());
        assert_eq!(report.cohorts.len(), 2);
        assert_eq!(report.cohort("Finance"), Some(&CohortStatistics::empty("Finance")));
    }

    #[tokio::test]
    async fn test_unresolved_profiles_count_at_cohort_level_only() {
        let store = reference_store();
        store.add_membership(CohortMembership::new("u2", "Affairs"));
        store.add_membership(CohortMembership::new("u3", "Affairs"));
        store.upsert_profile(Profile::new("u2", "Ravi", Some("Gone University")));
        store.upsert_profile(Profile::new("u3", "Sam", None));
        store.upsert_organization(OrganizationRecord::new(
            "o9",
            "Gone University",
            MembershipStatus::Inactive,
        ));

        let stats = compute_cohort(&store, "Affairs").await.unwrap();
        assert_eq!(stats.member_count, 3);
        assert_eq!(stats.organization_count, 1);
        assert_eq!(stats.organizations[0].member_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_memberships_resolve_once() {
        let store = reference_store();
        store.add_membership(CohortMembership::new("u1", "Affairs"));
        store.add_membership(CohortMembership::new("u4", "Affairs"));
        store.upsert_profile(Profile::new("u4", "Vera", Some("Acme")));

        let stats = compute_cohort(&store, "Affairs").await.unwrap();
        assert_eq!(stats.member_count, 2);
        assert_eq!(stats.organizations[0].member_count, 2);
    }

    #[tokio::test]
    async fn test_failing_cohort_is_omitted() {
        let inner = reference_store();
        inner.add_membership(CohortMembership::new("u1", "Finance"));
        let store = SimulatedRecordStore::new(inner, 3, SimulatedStoreConfig::no_faults());
        store.fail_cohort("Finance");

        let cohorts = vec!["Finance".to_string(), "Affairs".to_string()];
        let report = compute_cohort_statistics(&store, &cohorts).await;

        assert!(report.cohort("Finance").is_none());
        assert_eq!(report.cohorts.len(), 1);
        assert_eq!(report.cohorts[0].cohort_name, "Affairs");
        assert_eq!(report.cohorts[0].member_count, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].cohort_name, "Finance");
        assert!(matches!(
            report.failures[0].error,
            AnalyticsError::PartialComputationFailure { .. }
        ));
    }

    #[tokio::test]
    async fn test_profile_stage_failure_fails_every_nonempty_cohort() {
        let inner = reference_store();
        let store = SimulatedRecordStore::new(inner, 3, SimulatedStoreConfig::no_faults());
        store.fail_table(Table::Profiles);

        let cohorts = vec!["Affairs".to_string(), "Finance".to_string()];
        let report = compute_cohort_statistics(&store, &cohorts).await;

        // Finance has no members, so it never reaches the profile stage
        assert_eq!(report.cohorts.len(), 1);
        assert_eq!(report.cohorts[0].cohort_name, "Finance");
        assert!(report.failures[0].error.to_string().contains("profile resolution"));
    }
}
