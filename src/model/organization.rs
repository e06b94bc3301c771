use super::system_field::{SystemField, SystemValues};
use serde::{Deserialize, Serialize};

/// Membership status of an institution in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Inactive,
    Pending,
    Suspended,
    Former,
}

impl MembershipStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, MembershipStatus::Active)
    }
}

/// One member institution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRecord {
    pub id: String,
    pub name: String,
    pub status: MembershipStatus,
    pub systems: SystemValues,
}

impl OrganizationRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: MembershipStatus) -> Self {
        OrganizationRecord {
            id: id.into(),
            name: name.into(),
            status,
            systems: SystemValues::new(),
        }
    }

    /// Builder-style setter for a single system field
    pub fn with_system(mut self, field: SystemField, vendor: impl Into<String>) -> Self {
        self.systems.set(field, vendor);
        self
    }

    /// Trimmed vendor for `field`, `None` when blank
    pub fn system(&self, field: SystemField) -> Option<&str> {
        self.systems.get(field)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Copy of this record carrying only `field` among the system values
    pub fn project(&self, field: SystemField) -> OrganizationRecord {
        OrganizationRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            systems: self.systems.project(field),
        }
    }
}

/// Row of the externally refreshed snapshot table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecomputedAggregate {
    pub family: String,
    pub name: String,
    pub count: i64,
}

impl PrecomputedAggregate {
    pub fn new(family: impl Into<String>, name: impl Into<String>, count: i64) -> Self {
        PrecomputedAggregate {
            family: family.into(),
            name: name.into(),
            count,
        }
    }
}
