use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A connection between a user and a cloud data provider, as listed by the
/// data service and mirrored onto clinic patients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    #[serde(alias = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub provider_name: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
}

/// Body item of the clinic API data sources update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientDataSource {
    pub provider_name: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
}

impl From<&DataSource> for PatientDataSource {
    fn from(source: &DataSource) -> Self {
        Self {
            provider_name: source.provider_name.clone(),
            state: source.state.clone(),
            modified_time: source.modified_time,
            expiration_time: source.expiration_time,
        }
    }
}
