use base64::prelude::*;
use chrono::{DateTime, Utc};
use clinic_common::ehr::{
    ContentType, NewOrder, Note, Notes, OrderRef, Provider, DATA_MODEL_NOTES, EVENT_TYPE_NEW,
    EVENT_TYPE_REPLACE, REPORT_AVAILABILITY, REPORT_DOCUMENT_TYPE, REPORT_PROVIDER_ID,
};
use clinic_common::models::ehr::NoteEventType;

use super::flowsheet::format_date_time;
use super::Addressing;

pub const REPORT_MIME_TYPE: &str = "application/pdf";
const REPORT_DESCRIPTION: &str = "Tidepool summary and report";

/// The rendered report, either embedded in the notes or stored by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportFile {
    Embedded(Vec<u8>),
    Uploaded { uri: String },
}

impl ReportFile {
    fn contents(&self) -> (ContentType, String) {
        match self {
            ReportFile::Embedded(pdf) => (ContentType::Base64Encoded, BASE64_STANDARD.encode(pdf)),
            ReportFile::Uploaded { uri } => (ContentType::PlainText, uri.clone()),
        }
    }
}

/// Default document id of the reports of a patient.
pub fn document_id(clinic_id: &str, patient_id: &str) -> String {
    format!("Report-{clinic_id}-{patient_id}")
}

pub fn file_name(document_id: &str) -> String {
    format!("{document_id}.pdf")
}

/// Replacing needs both the setting and a document to replace.
pub fn replaces(event_type: Option<NoteEventType>, preceding_document_id: Option<&str>) -> bool {
    event_type == Some(NoteEventType::Replace) && preceding_document_id.is_some()
}

pub struct NotesRequest<'a> {
    pub order: &'a NewOrder,
    pub document_id: &'a str,
    pub preceding_document_id: Option<&'a str>,
    pub replace: bool,
    pub file: ReportFile,
}

pub fn build_notes(addressing: &Addressing, request: NotesRequest<'_>, now: DateTime<Utc>) -> Notes {
    let now = format_date_time(now);
    let event_type = if request.replace {
        EVENT_TYPE_REPLACE
    } else {
        EVENT_TYPE_NEW
    };
    let (content_type, file_contents) = request.file.contents();
    let order = request.order;

    Notes {
        meta: addressing.meta(DATA_MODEL_NOTES, event_type, &now),
        patient: order.patient.clone(),
        visit: order.visit_reference(),
        note: Note {
            content_type,
            file_name: file_name(request.document_id),
            file_contents,
            document_type: REPORT_DOCUMENT_TYPE.to_owned(),
            document_id: request.document_id.to_owned(),
            original_document_id: request
                .preceding_document_id
                .filter(|_| request.replace)
                .map(str::to_owned),
            document_description: Some(REPORT_DESCRIPTION.to_owned()),
            service_date_time: now.clone(),
            documentation_date_time: now,
            provider: Provider {
                id: Some(REPORT_PROVIDER_ID.to_owned()),
                ..Default::default()
            },
            availability: REPORT_AVAILABILITY.to_owned(),
        },
        orders: vec![OrderRef {
            id: order.order.id.clone(),
            procedure: order.order.procedure.clone(),
            provider: order.order.provider.clone(),
        }],
    }
}
