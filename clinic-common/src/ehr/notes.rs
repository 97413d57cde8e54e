use serde::{Deserialize, Serialize};

use super::common::{Meta, Patient, Procedure, Provider, Visit};

pub const REPORT_DOCUMENT_TYPE: &str = "Tidepool Report";
pub const REPORT_PROVIDER_ID: &str = "Tidepool";
pub const REPORT_AVAILABILITY: &str = "Available";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "Base64 Encoded")]
    Base64Encoded,
    #[serde(rename = "Plain Text")]
    PlainText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Note {
    pub content_type: ContentType,
    pub file_name: String,
    pub file_contents: String,
    pub document_type: String,
    #[serde(rename = "DocumentID")]
    pub document_id: String,
    #[serde(
        rename = "OriginalDocumentID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_description: Option<String>,
    pub service_date_time: String,
    pub documentation_date_time: String,
    pub provider: Provider,
    pub availability: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderRef {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure: Option<Procedure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
}

/// A `New` or `Replace` notes document carrying the summary report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notes {
    pub meta: Meta,
    pub patient: Patient,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit: Option<Visit>,
    pub note: Note,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orders: Vec<OrderRef>,
}
