use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ehr::MessageEnvelope;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecedingDocument {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
}

/// Written by the clinic service scheduler each time a report is due for a
/// patient enrolled through an EHR order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledSummaryAndReport {
    #[serde(alias = "_id")]
    pub id: String,
    pub user_id: String,
    pub clinic_id: String,
    pub last_matched_order: MessageEnvelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preceding_document: Option<PrecedingDocument>,
}
