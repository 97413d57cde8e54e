//! Reports due on a schedule for patients enrolled through an EHR order.
//!
//! The scheduler stores the last order that matched the patient, which is
//! replayed to address the new report. Patients who did not upload recently
//! have nothing new to report.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use clinic_common::cdc::decode_document;
use clinic_common::models::{PatientSummary, ScheduledSummaryAndReport};
use common_kafka::kafka_consumer::ConsumedMessage;
use tracing::{debug, info};

use crate::consumer::RecordHandler;
use crate::ehr::handler::holds_new_order;
use crate::ehr::{OrderProcessor, ReportParameters};
use crate::error::{ClientResultExt, HandlerError};

const UPLOAD_FRESHNESS_DAYS: i64 = 14;

/// Whether CGM or BGM data was uploaded within the last two weeks.
pub fn has_recent_upload(summary: Option<&PatientSummary>, now: DateTime<Utc>) -> bool {
    let Some(summary) = summary else {
        return false;
    };
    let cutoff = now - Duration::days(UPLOAD_FRESHNESS_DAYS);
    [
        summary.cgm_stats.as_ref().and_then(|stats| stats.dates.last_upload_date),
        summary.bgm_stats.as_ref().and_then(|stats| stats.dates.last_upload_date),
    ]
    .into_iter()
    .flatten()
    .any(|uploaded| uploaded >= cutoff)
}

pub struct ScheduledReportsHandler {
    processor: Arc<OrderProcessor>,
}

impl ScheduledReportsHandler {
    pub fn new(processor: Arc<OrderProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl RecordHandler for ScheduledReportsHandler {
    fn name(&self) -> &str {
        "scheduled_reports"
    }

    async fn handle(&self, message: &ConsumedMessage) -> Result<(), HandlerError> {
        let payload = message.payload.as_deref().unwrap_or_default();
        let scheduled: ScheduledSummaryAndReport = decode_document(payload)?;
        if !holds_new_order(&scheduled.last_matched_order) {
            return Ok(());
        }
        let clinic_id = scheduled.clinic_id.as_str();
        let user_id = scheduled.user_id.as_str();
        let clinics = &self.processor.context().clinics;

        let Some(patient) = clinics
            .get_patient(clinic_id, user_id)
            .await
            .with_context(|| format!("fetching patient {user_id} of clinic {clinic_id}"))?
        else {
            debug!(clinic_id, user_id, "patient no longer in clinic, skipping scheduled report");
            return Ok(());
        };
        let Some(clinic) = clinics
            .get_clinic(clinic_id)
            .await
            .with_context(|| format!("fetching clinic {clinic_id}"))?
        else {
            debug!(clinic_id, "clinic deleted, skipping scheduled report");
            return Ok(());
        };
        let settings = clinics
            .get_ehr_settings(clinic_id)
            .await
            .with_context(|| format!("fetching ehr settings of clinic {clinic_id}"))?;
        let Some(settings) = settings.filter(|settings| settings.enabled) else {
            debug!(clinic_id, "ehr integration disabled, skipping scheduled report");
            return Ok(());
        };
        if !has_recent_upload(patient.summary.as_ref(), Utc::now()) {
            debug!(clinic_id, user_id, "no recent uploads, skipping scheduled report");
            return Ok(());
        }

        let order = scheduled.last_matched_order.decode_order().map_err(|error| {
            HandlerError::Invalid(format!("scheduled report {} has a malformed order: {error}", scheduled.id))
        })?;

        self.processor
            .send_summary_and_report(ReportParameters {
                clinic_id,
                clinic: &clinic,
                patient: &patient,
                settings: &settings,
                order: &order,
                document_id: Some(&scheduled.id),
                preceding_document_id: scheduled
                    .preceding_document
                    .as_ref()
                    .map(|preceding| preceding.id.as_str()),
            })
            .await?;
        info!(clinic_id, user_id, id = scheduled.id, "scheduled report sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::test::message;
    use crate::ehr::test::{clinic, gateway_processor, mock_token, settings};
    use httpmock::prelude::*;
    use serde_json::{json, Value};

    fn summary_uploaded(cgm: DateTime<Utc>, bgm: DateTime<Utc>) -> Value {
        let stats = |uploaded: DateTime<Utc>| {
            json!({
                "dates": {
                    "firstData": "2024-01-01T00:00:00Z",
                    "lastData": uploaded,
                    "lastUploadDate": uploaded,
                },
                "periods": {"14d": {"timeInTarget": {"percent": 0.6}}},
            })
        };
        json!({"cgmStats": stats(cgm), "bgmStats": stats(bgm)})
    }

    fn scheduled(preceding: Option<&str>) -> String {
        scheduled_from("Order", preceding)
    }

    fn scheduled_from(data_model: &str, preceding: Option<&str>) -> String {
        let mut document = json!({
            "_id": {"$oid": "65f1c0ffee00000000000002"},
            "userId": "u1",
            "clinicId": "c1",
            "lastMatchedOrder": {
                "_id": {"$oid": "65f1c0ffee00000000000001"},
                "meta": {"DataModel": data_model, "EventType": "New"},
                "message": {
                    "Patient": {"Identifiers": [{"ID": "M456", "IDType": "MRN"}]},
                    "Order": {"ID": "o1", "Procedure": {"Code": "ENABLE"}},
                },
            },
        });
        if let Some(id) = preceding {
            document["precedingDocument"] = json!({"id": id, "createdTime": {"$date": "2024-05-01T00:00:00Z"}});
        }
        document.to_string()
    }

    fn mock_lookups(server: &MockServer, summary: Value) {
        server.mock(|when, then| {
            when.method(GET).path("/v1/clinics/c1/patients/u1");
            then.status(200)
                .json_body(json!({"id": "u1", "fullName": "Jane Doe", "summary": summary}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/v1/clinics/c1");
            then.status(200).json_body(clinic());
        });
        server.mock(|when, then| {
            when.method(GET).path("/v1/clinics/c1/settings/ehr");
            then.status(200).json_body(settings());
        });
    }

    #[test]
    fn freshness_needs_a_recent_upload() {
        let now = Utc::now();
        let stale = now - Duration::days(15);
        let fresh = now - Duration::days(2);

        let summary = |cgm, bgm| -> PatientSummary {
            serde_json::from_value(summary_uploaded(cgm, bgm)).unwrap()
        };
        assert!(!has_recent_upload(Some(&summary(stale, stale)), now));
        assert!(has_recent_upload(Some(&summary(stale, fresh)), now));
        assert!(has_recent_upload(Some(&summary(fresh, stale)), now));
        assert!(!has_recent_upload(None, now));
    }

    #[tokio::test]
    async fn stale_uploads_send_nothing() {
        let server = MockServer::start();
        let stale = Utc::now() - Duration::days(20);
        mock_lookups(&server, summary_uploaded(stale, stale));
        let report = server.mock(|when, then| {
            when.method(POST).path("/export/report/u1");
            then.status(200).body("%PDF");
        });
        let endpoint = server.mock(|when, then| {
            when.method(POST).path("/endpoint");
            then.status(200);
        });

        ScheduledReportsHandler::new(Arc::new(gateway_processor(&server)))
            .handle(&message("clinic.scheduledSummaryAndReportsOrders", &scheduled(None)))
            .await
            .unwrap();

        report.assert_hits(0);
        endpoint.assert_hits(0);
    }

    #[tokio::test]
    async fn fresh_uploads_replace_the_preceding_report() {
        let server = MockServer::start();
        mock_token(&server);
        let fresh = Utc::now() - Duration::days(1);
        mock_lookups(&server, summary_uploaded(fresh, fresh));
        server.mock(|when, then| {
            when.method(POST).path("/export/report/u1");
            then.status(200).body("%PDF");
        });
        let flowsheet = server.mock(|when, then| {
            when.method(POST)
                .path("/endpoint")
                .json_body_partial(json!({"Meta": {"DataModel": "Flowsheet"}}).to_string());
            then.status(200);
        });
        let notes = server.mock(|when, then| {
            when.method(POST)
                .path("/endpoint")
                .json_body_partial(json!({
                    "Meta": {"DataModel": "Notes", "EventType": "Replace"},
                    "Note": {
                        "DocumentID": "65f1c0ffee00000000000002",
                        "OriginalDocumentID": "d0",
                    },
                }).to_string());
            then.status(200);
        });

        ScheduledReportsHandler::new(Arc::new(gateway_processor(&server)))
            .handle(&message("clinic.scheduledSummaryAndReportsOrders", &scheduled(Some("d0"))))
            .await
            .unwrap();

        flowsheet.assert();
        notes.assert();
    }

    #[tokio::test]
    async fn removed_patients_are_skipped() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/clinics/c1/patients/u1");
            then.status(404);
        });
        let clinic_lookup = server.mock(|when, then| {
            when.method(GET).path("/v1/clinics/c1");
            then.status(200).json_body(clinic());
        });

        ScheduledReportsHandler::new(Arc::new(gateway_processor(&server)))
            .handle(&message("clinic.scheduledSummaryAndReportsOrders", &scheduled(None)))
            .await
            .unwrap();

        clinic_lookup.assert_hits(0);
    }

    #[tokio::test]
    async fn stored_messages_other_than_new_orders_are_skipped() {
        let server = MockServer::start();
        let any = server.mock(|when, then| {
            when.any_request();
            then.status(500);
        });
        let handler = ScheduledReportsHandler::new(Arc::new(gateway_processor(&server)));

        handler
            .handle(&message(
                "clinic.scheduledSummaryAndReportsOrders",
                &scheduled_from("Results", Some("d0")),
            ))
            .await
            .unwrap();
        handler
            .handle(&message(
                "clinic.scheduledSummaryAndReportsOrders",
                &scheduled_from("", None),
            ))
            .await
            .unwrap();

        any.assert_hits(0);
    }
}
