//! System Fields
//!
//! The permitted categorical attributes of an organization record. Field names
//! arriving from consumers are parsed into `SystemField` at the boundary;
//! nothing downstream ever reads an attribute by string name.

use crate::error::AnalyticsError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Number of system fields carried on every organization record
pub const SYSTEM_FIELD_COUNT: usize = 20;

/// Software category whose vendor an organization reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemField {
    StudentInformation,
    LearningManagement,
    FinancialAid,
    EnterpriseResourcePlanning,
    CustomerRelationship,
    HumanResources,
    Payroll,
    LibraryServices,
    IdentityManagement,
    Housing,
    Advancement,
    Admissions,
    DegreeAudit,
    DocumentImaging,
    HelpDesk,
    EmailPlatform,
    CardAccess,
    Parking,
    CourseScheduling,
    DataWarehouse,
}

impl SystemField {
    pub const ALL: [SystemField; SYSTEM_FIELD_COUNT] = [
        SystemField::StudentInformation,
        SystemField::LearningManagement,
        SystemField::FinancialAid,
        SystemField::EnterpriseResourcePlanning,
        SystemField::CustomerRelationship,
        SystemField::HumanResources,
        SystemField::Payroll,
        SystemField::LibraryServices,
        SystemField::IdentityManagement,
        SystemField::Housing,
        SystemField::Advancement,
        SystemField::Admissions,
        SystemField::DegreeAudit,
        SystemField::DocumentImaging,
        SystemField::HelpDesk,
        SystemField::EmailPlatform,
        SystemField::CardAccess,
        SystemField::Parking,
        SystemField::CourseScheduling,
        SystemField::DataWarehouse,
    ];

    /// Stable column name
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemField::StudentInformation => "student_information",
            SystemField::LearningManagement => "learning_management",
            SystemField::FinancialAid => "financial_aid",
            SystemField::EnterpriseResourcePlanning => "enterprise_resource_planning",
            SystemField::CustomerRelationship => "customer_relationship",
            SystemField::HumanResources => "human_resources",
            SystemField::Payroll => "payroll",
            SystemField::LibraryServices => "library_services",
            SystemField::IdentityManagement => "identity_management",
            SystemField::Housing => "housing",
            SystemField::Advancement => "advancement",
            SystemField::Admissions => "admissions",
            SystemField::DegreeAudit => "degree_audit",
            SystemField::DocumentImaging => "document_imaging",
            SystemField::HelpDesk => "help_desk",
            SystemField::EmailPlatform => "email_platform",
            SystemField::CardAccess => "card_access",
            SystemField::Parking => "parking",
            SystemField::CourseScheduling => "course_scheduling",
            SystemField::DataWarehouse => "data_warehouse",
        }
    }

    /// Slot of this field in `SystemValues`
    #[inline]
    pub fn index(&self) -> usize {
        let idx = *self as usize;
        debug_assert!(idx < SYSTEM_FIELD_COUNT, "System field index {} out of bounds", idx);
        idx
    }
}

impl std::fmt::Display for SystemField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemField {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        SystemField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| AnalyticsError::UnknownField(s.to_string()))
    }
}

/// Vendor values of one record, one optional slot per system field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemValues {
    values: [Option<String>; SYSTEM_FIELD_COUNT],
}

impl SystemValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored value, which may be empty or whitespace
    pub fn raw(&self, field: SystemField) -> Option<&str> {
        self.values[field.index()].as_deref()
    }

    /// Stored value, `None` when absent or blank
    pub fn get(&self, field: SystemField) -> Option<&str> {
        self.raw(field).filter(|v| !v.trim().is_empty())
    }

    pub fn set(&mut self, field: SystemField, value: impl Into<String>) {
        self.values[field.index()] = Some(value.into());
    }

    pub fn clear(&mut self, field: SystemField) {
        self.values[field.index()] = None;
    }

    /// Keep only `field`, dropping every other slot
    pub fn project(&self, field: SystemField) -> SystemValues {
        let mut projected = SystemValues::new();
        projected.values[field.index()] = self.values[field.index()].clone();
        projected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_fields_have_unique_indices() {
        for (i, field) in SystemField::ALL.iter().enumerate() {
            assert_eq!(field.index(), i, "{} out of order", field);
        }
    }

    #[test]
    fn test_parse_round_trips_every_name() {
        for field in SystemField::ALL {
            assert_eq!(field.as_str().parse::<SystemField>().unwrap(), field);
        }
        assert_eq!(
            " Payroll ".parse::<SystemField>().unwrap(),
            SystemField::Payroll
        );
    }

    #[test]
    fn test_parse_rejects_unknown_name() {
        let err = "fax_machine".parse::<SystemField>().unwrap_err();
        assert_eq!(err, AnalyticsError::UnknownField("fax_machine".to_string()));
    }

    #[test]
    fn test_blank_values_read_as_none() {
        let mut values = SystemValues::new();
        values.set(SystemField::Housing, "   ");
        values.set(SystemField::Payroll, " Workday ");

        assert_eq!(values.raw(SystemField::Housing), Some("   "));
        assert_eq!(values.get(SystemField::Housing), None);
        assert_eq!(values.get(SystemField::Payroll), Some(" Workday "));
        assert_eq!(values.get(SystemField::Parking), None);
    }

    #[test]
    fn test_project_keeps_single_field() {
        let mut values = SystemValues::new();
        values.set(SystemField::Housing, "StarRez");
        values.set(SystemField::Payroll, "Workday");

        let projected = values.project(SystemField::Payroll);
        assert_eq!(projected.get(SystemField::Payroll), Some("Workday"));
        assert_eq!(projected.get(SystemField::Housing), None);
    }
}
