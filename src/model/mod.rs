//! Directory Data Model
//!
//! Records read from the directory store and the aggregate DTOs derived
//! from them. Records are read-only to this crate.

mod aggregate;
mod cohort;
mod organization;
mod system_field;

pub use aggregate::{
    Bucket, CohortFailure, CohortOrganization, CohortReport, CohortStatistics, Distribution,
    Totals,
};
pub use cohort::{CohortMembership, Profile, DEFAULT_COHORTS};
pub use organization::{MembershipStatus, OrganizationRecord, PrecomputedAggregate};
pub use system_field::{SystemField, SystemValues, SYSTEM_FIELD_COUNT};
