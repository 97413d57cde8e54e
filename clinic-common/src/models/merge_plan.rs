use serde::{Deserialize, Serialize};

use super::clinician::CLINIC_ADMIN_ROLE;

/// A step of a clinic merge, written by the clinic service once the merge is
/// executed. The worker only sends the notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MergePlan {
    Patient(PatientMergePlan),
    Clinician(ClinicianMergePlan),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanClinics {
    pub source_clinic_id: Option<String>,
    pub source_clinic_name: Option<String>,
    pub target_clinic_id: Option<String>,
    pub target_clinic_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientMergePlan {
    #[serde(flatten)]
    pub clinics: PlanClinics,
    pub user_id: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClinicianAction {
    Retain,
    Merge,
    MergeInto,
    Move,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicianMergePlan {
    #[serde(flatten)]
    pub clinics: PlanClinics,
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub clinician_action: ClinicianAction,
    #[serde(default)]
    pub resulting_roles: Vec<String>,
}

impl ClinicianMergePlan {
    pub fn becomes_admin(&self) -> bool {
        self.resulting_roles
            .iter()
            .any(|role| role == CLINIC_ADMIN_ROLE)
    }
}
