use super::{RecordStore, StoreFuture};
use crate::feed::{ChangeKind, InMemoryChangeFeed, Table};
use crate::model::{
    CohortMembership, OrganizationRecord, PrecomputedAggregate, Profile, SystemField,
};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Tables {
    /// Insertion order is the encounter order seen by aggregators
    organizations: Vec<OrganizationRecord>,
    memberships: Vec<CohortMembership>,
    profiles: Vec<Profile>,
    aggregates: Vec<PrecomputedAggregate>,
}

/// In-memory directory tables
///
/// Clones share the same tables. When a change feed is attached, every
/// mutation publishes a change event for the touched table.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    tables: Arc<RwLock<Tables>>,
    feed: Option<InMemoryChangeFeed>,
    reads: Arc<AtomicU64>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose mutations are announced on `feed`
    pub fn with_feed(feed: InMemoryChangeFeed) -> Self {
        InMemoryRecordStore {
            feed: Some(feed),
            ..Self::default()
        }
    }

    /// Total read queries served
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn notify(&self, table: Table, kind: ChangeKind) {
        if let Some(feed) = &self.feed {
            feed.publish(table, kind);
        }
    }

    fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    /// Insert or replace by id
    pub fn upsert_organization(&self, record: OrganizationRecord) {
        let kind = {
            let mut tables = self.tables.write();
            match tables.organizations.iter_mut().find(|o| o.id == record.id) {
                Some(existing) => {
                    *existing = record;
                    ChangeKind::Update
                }
                None => {
                    tables.organizations.push(record);
                    ChangeKind::Insert
                }
            }
        };
        self.notify(Table::Organizations, kind);
    }

    pub fn remove_organization(&self, id: &str) -> bool {
        let removed = {
            let mut tables = self.tables.write();
            let before = tables.organizations.len();
            tables.organizations.retain(|o| o.id != id);
            tables.organizations.len() != before
        };
        if removed {
            self.notify(Table::Organizations, ChangeKind::Delete);
        }
        removed
    }

    pub fn add_membership(&self, membership: CohortMembership) {
        self.tables.write().memberships.push(membership);
        self.notify(Table::CohortMemberships, ChangeKind::Insert);
    }

    pub fn remove_membership(&self, user_id: &str, cohort: &str) -> bool {
        let removed = {
            let mut tables = self.tables.write();
            let before = tables.memberships.len();
            tables
                .memberships
                .retain(|m| !(m.user_id == user_id && m.cohort == cohort));
            tables.memberships.len() != before
        };
        if removed {
            self.notify(Table::CohortMemberships, ChangeKind::Delete);
        }
        removed
    }

    /// Insert or replace by user id
    pub fn upsert_profile(&self, profile: Profile) {
        let kind = {
            let mut tables = self.tables.write();
            match tables
                .profiles
                .iter_mut()
                .find(|p| p.user_id == profile.user_id)
            {
                Some(existing) => {
                    *existing = profile;
                    ChangeKind::Update
                }
                None => {
                    tables.profiles.push(profile);
                    ChangeKind::Insert
                }
            }
        };
        self.notify(Table::Profiles, kind);
    }

    /// Insert or replace the (family, name) snapshot row
    pub fn set_aggregate(&self, aggregate: PrecomputedAggregate) {
        let kind = {
            let mut tables = self.tables.write();
            match tables
                .aggregates
                .iter_mut()
                .find(|a| a.family == aggregate.family && a.name == aggregate.name)
            {
                Some(existing) => {
                    existing.count = aggregate.count;
                    ChangeKind::Update
                }
                None => {
                    tables.aggregates.push(aggregate);
                    ChangeKind::Insert
                }
            }
        };
        self.notify(Table::PrecomputedAggregates, kind);
    }

    pub fn organization_count(&self) -> usize {
        self.tables.read().organizations.len()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn active_organizations<'a>(
        &'a self,
        projection: Option<SystemField>,
    ) -> StoreFuture<'a, Vec<OrganizationRecord>> {
        Box::pin(async move {
            self.record_read();
            let tables = self.tables.read();
            let active = tables
                .organizations
                .iter()
                .filter(|o| o.is_active())
                .map(|o| match projection {
                    Some(field) => o.project(field),
                    None => o.clone(),
                })
                .collect();
            Ok(active)
        })
    }

    fn active_organizations_by_name<'a>(
        &'a self,
        names: &'a [String],
    ) -> StoreFuture<'a, Vec<OrganizationRecord>> {
        Box::pin(async move {
            self.record_read();
            let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
            let tables = self.tables.read();
            let matched = tables
                .organizations
                .iter()
                .filter(|o| o.is_active() && wanted.contains(o.name.as_str()))
                .cloned()
                .collect();
            Ok(matched)
        })
    }

    fn cohort_memberships<'a>(&'a self, cohort: &'a str) -> StoreFuture<'a, Vec<CohortMembership>> {
        Box::pin(async move {
            self.record_read();
            let tables = self.tables.read();
            Ok(tables
                .memberships
                .iter()
                .filter(|m| m.cohort == cohort)
                .cloned()
                .collect())
        })
    }

    fn profiles_by_user_ids<'a>(&'a self, user_ids: &'a [String]) -> StoreFuture<'a, Vec<Profile>> {
        Box::pin(async move {
            self.record_read();
            let wanted: HashSet<&str> = user_ids.iter().map(String::as_str).collect();
            let tables = self.tables.read();
            Ok(tables
                .profiles
                .iter()
                .filter(|p| wanted.contains(p.user_id.as_str()))
                .cloned()
                .collect())
        })
    }

    fn precomputed_aggregates<'a>(
        &'a self,
        family: &'a str,
    ) -> StoreFuture<'a, Vec<PrecomputedAggregate>> {
        Box::pin(async move {
            self.record_read();
            let tables = self.tables.read();
            Ok(tables
                .aggregates
                .iter()
                .filter(|a| a.family == family)
                .cloned()
                .collect())
        })
    }
}
