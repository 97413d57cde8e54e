use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::data_source::PatientDataSource;
use super::summary::PatientSummary;

/// Data sharing permissions a clinic holds on a patient. Each permission is
/// an empty object when granted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custodian: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<Value>,
}

impl Permissions {
    /// Permissions granted to accounts created on behalf of a patient.
    pub fn custodial() -> Self {
        let granted = || Some(Value::Object(Default::default()));
        Self {
            custodian: granted(),
            view: granted(),
            upload: granted(),
            note: granted(),
        }
    }

    pub fn view() -> Self {
        Self {
            view: Some(Value::Object(Default::default())),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(alias = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mrn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_devices: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_sources: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<PatientSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_requested_connect_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_upload_reminder_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl Patient {
    pub fn is_custodial(&self) -> bool {
        self.permissions
            .as_ref()
            .is_some_and(|permissions| permissions.custodian.is_some())
    }

    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or_default()
    }
}

/// Body of the clinic API patient account creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientAccount {
    pub full_name: String,
    pub birth_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mrn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub tags: Vec<String>,
    pub permissions: Permissions,
}

/// Body of the clinic API data sources update.
pub type DataSourcesUpdate = Vec<PatientDataSource>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn custodial_only_with_custodian_permission() {
        let custodial: Patient = serde_json::from_value(json!({
            "_id": "p1",
            "userId": "u1",
            "permissions": {"custodian": {}, "view": {}},
        }))
        .unwrap();
        assert!(custodial.is_custodial());

        let shared: Patient = serde_json::from_value(json!({
            "id": "p2",
            "permissions": {"view": {}},
        }))
        .unwrap();
        assert!(!shared.is_custodial());
        assert!(!Patient::default().is_custodial());
    }

    #[test]
    fn custodial_permissions_serialize_as_empty_objects() {
        assert_eq!(
            serde_json::to_value(Permissions::custodial()).unwrap(),
            json!({"custodian": {}, "view": {}, "upload": {}, "note": {}})
        );
    }
}
