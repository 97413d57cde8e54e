use serde::{Deserialize, Serialize};

use super::clinic::Clinic;
use super::patient::Patient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchCriterion {
    Mrn,
    MrnDateOfBirth,
    DateOfBirthFullName,
}

/// Side effect the clinic service applies when exactly one patient matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchAction {
    EnableReports,
    DisableReports,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub document_id: String,
    pub data_model: String,
    pub event_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientMatch {
    pub criteria: Vec<MatchCriterion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_unique_match: Option<MatchAction>,
}

/// The clinic service loads the order referenced by `message_ref` and looks
/// up the ordering clinic, its EHR settings and the matching patients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EhrMatchRequest {
    pub message_ref: MessageRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patients: Option<PatientMatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcedureCodes {
    pub enable_summary_reports: Option<String>,
    pub disable_summary_reports: Option<String>,
    pub create_account: Option<String>,
    pub create_account_and_enable_reports: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DestinationIds {
    pub flowsheet: String,
    pub notes: String,
    pub results: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TagsSettings {
    pub codes: Vec<String>,
    pub separator: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlowsheetSettings {
    pub icode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteEventType {
    #[serde(alias = "NEW", alias = "new")]
    New,
    #[serde(alias = "REPLACE", alias = "replace")]
    Replace,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduledReportsSettings {
    pub on_upload_enabled: bool,
    pub on_upload_note_event_type: Option<NoteEventType>,
    pub cadence: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EhrSettings {
    pub enabled: bool,
    pub source_id: String,
    pub procedure_codes: ProcedureCodes,
    pub destination_ids: Option<DestinationIds>,
    pub tags: TagsSettings,
    pub flowsheets: FlowsheetSettings,
    pub scheduled_reports: ScheduledReportsSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EhrMatchResponse {
    pub clinic: Clinic,
    #[serde(default)]
    pub patients: Option<Vec<Patient>>,
    pub settings: EhrSettings,
}

impl EhrMatchResponse {
    pub fn patients(&self) -> &[Patient] {
        self.patients.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn match_request_shape() {
        let request = EhrMatchRequest {
            message_ref: MessageRef {
                document_id: "o1".to_string(),
                data_model: "Order".to_string(),
                event_type: "New".to_string(),
            },
            patients: Some(PatientMatch {
                criteria: vec![MatchCriterion::MrnDateOfBirth],
                on_unique_match: Some(MatchAction::EnableReports),
            }),
        };

        assert_json_diff::assert_json_eq!(
            serde_json::to_value(request).unwrap(),
            json!({
                "messageRef": {"documentId": "o1", "dataModel": "Order", "eventType": "New"},
                "patients": {"criteria": ["MRN_DATE_OF_BIRTH"], "onUniqueMatch": "ENABLE_REPORTS"},
            })
        );
    }

    #[test]
    fn settings_decode_with_defaults() {
        let response: EhrMatchResponse = serde_json::from_value(json!({
            "clinic": {"id": "c1", "name": "Acme", "preferredBgUnits": "mmol/L"},
            "patients": null,
            "settings": {
                "enabled": true,
                "sourceId": "src",
                "procedureCodes": {"enableSummaryReports": "TP1"},
                "tags": {"codes": ["TIDEPOOL_TAGS"], "separator": ","},
                "scheduledReports": {"onUploadNoteEventType": "REPLACE"},
            },
        }))
        .unwrap();

        assert!(response.patients().is_empty());
        assert_eq!(
            response.settings.procedure_codes.enable_summary_reports.as_deref(),
            Some("TP1")
        );
        assert_eq!(
            response.settings.scheduled_reports.on_upload_note_event_type,
            Some(NoteEventType::Replace)
        );
        assert!(!response.settings.flowsheets.icode);
        assert!(response.settings.destination_ids.is_none());
    }
}
