use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CLINIC_ADMIN_ROLE: &str = "CLINIC_ADMIN";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolesUpdate {
    pub updated_by: Option<String>,
    pub updated_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clinician {
    #[serde(alias = "_id", default)]
    pub id: Option<String>,
    pub clinic_id: Option<String>,
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles_updates: Vec<RolesUpdate>,
}

impl Clinician {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|role| role == CLINIC_ADMIN_ROLE)
    }
}
