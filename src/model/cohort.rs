use serde::{Deserialize, Serialize};

/// Cohorts reported on when no override is configured
pub const DEFAULT_COHORTS: [&str; 6] = [
    "Affairs",
    "Finance",
    "Technology",
    "Library",
    "Enrollment",
    "Leadership",
];

/// Row of the user ↔ cohort membership table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CohortMembership {
    pub user_id: String,
    pub cohort: String,
}

impl CohortMembership {
    pub fn new(user_id: impl Into<String>, cohort: impl Into<String>) -> Self {
        CohortMembership {
            user_id: user_id.into(),
            cohort: cohort.into(),
        }
    }
}

/// User profile as seen by the cohort join
///
/// `organization` is the free-text organization name the user entered; it is
/// matched against organization records by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub name: String,
    pub organization: Option<String>,
}

impl Profile {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        organization: Option<&str>,
    ) -> Self {
        Profile {
            user_id: user_id.into(),
            name: name.into(),
            organization: organization.map(str::to_string),
        }
    }
}
