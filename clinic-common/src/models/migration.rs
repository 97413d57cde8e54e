use serde::{Deserialize, Serialize};

/// Request to move the patients of a legacy clinician account into a clinic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    #[serde(alias = "_id", default)]
    pub id: Option<String>,
    pub clinic_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}
