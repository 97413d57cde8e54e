use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use clinic_common::clients::reports::{ReportDetail, UserDetail};
use clinic_common::clients::{EhrGatewayClient, ReportRequest};
use clinic_common::ehr::{
    Flowsheet, NewOrder, DATA_MODEL_FLOWSHEET, DATA_MODEL_ORDER, EVENT_TYPE_NEW,
};
use clinic_common::models::ehr::{MessageRef, PatientMatch, ProcedureCodes};
use clinic_common::models::patient::CreatePatientAccount;
use clinic_common::models::{
    Clinic, EhrMatchRequest, EhrMatchResponse, EhrSettings, MatchAction, MatchCriterion, Patient,
    Permissions,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use super::flowsheet::{self, format_date_time};
use super::notes::{self, NotesRequest, ReportFile, REPORT_MIME_TYPE};
use super::results::{self, build_results, Outcome};
use super::tags::{resolve_tag_ids, tag_names};
use super::Addressing;
use crate::context::AppContext;
use crate::error::{ClientResultExt, HandlerError};

/// Patients younger than this are reached through their guarantor.
const GUARANTOR_AGE: u32 = 13;
const REPORT_DAYS: i64 = 14;
const REPORTS: [&str; 1] = ["all"];

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("hard-coded regular expression to be valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderState {
    Received,
    Matched,
    Dispatched,
    Completed,
    Failed,
}

/// What the clinic configured the order procedure to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Procedure {
    EnableReports,
    DisableReports,
    CreateAccount,
    CreateAccountAndEnableReports,
}

impl Procedure {
    fn classify(code: &str, codes: &ProcedureCodes) -> Option<Self> {
        let is = |configured: &Option<String>| configured.as_deref() == Some(code);
        if is(&codes.enable_summary_reports) {
            Some(Procedure::EnableReports)
        } else if is(&codes.disable_summary_reports) {
            Some(Procedure::DisableReports)
        } else if is(&codes.create_account) {
            Some(Procedure::CreateAccount)
        } else if is(&codes.create_account_and_enable_reports) {
            Some(Procedure::CreateAccountAndEnableReports)
        } else {
            None
        }
    }
}

/// An order matched to its clinic.
struct MatchedOrder<'a> {
    document_id: &'a str,
    order: &'a NewOrder,
    clinic_id: String,
    clinic: Clinic,
    settings: EhrSettings,
}

/// Everything a summary and report is made of.
pub struct ReportParameters<'a> {
    pub clinic_id: &'a str,
    pub clinic: &'a Clinic,
    pub patient: &'a Patient,
    pub settings: &'a EhrSettings,
    pub order: &'a NewOrder,
    /// Scheduled reports keep the id of their schedule.
    pub document_id: Option<&'a str>,
    pub preceding_document_id: Option<&'a str>,
}

/// Processes new orders, from the patient match to the results sent back.
pub struct OrderProcessor {
    context: Arc<AppContext>,
    gateway: Arc<EhrGatewayClient>,
}

impl OrderProcessor {
    pub fn new(context: Arc<AppContext>, gateway: Arc<EhrGatewayClient>) -> Self {
        Self { context, gateway }
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    fn addressing(&self, destination: &str) -> Addressing {
        Addressing {
            source: self.gateway.source(),
            destination: destination.to_owned(),
            test: self.gateway.test_mode(),
        }
    }

    async fn match_patients(
        &self,
        document_id: &str,
        criteria: Vec<MatchCriterion>,
        on_unique_match: Option<MatchAction>,
    ) -> Result<EhrMatchResponse, HandlerError> {
        let request = EhrMatchRequest {
            message_ref: MessageRef {
                document_id: document_id.to_owned(),
                data_model: DATA_MODEL_ORDER.to_owned(),
                event_type: EVENT_TYPE_NEW.to_owned(),
            },
            patients: Some(PatientMatch {
                criteria,
                on_unique_match,
            }),
        };
        self.context
            .clinics
            .match_ehr_patients(&request)
            .await
            .with_context(|| format!("matching order {document_id}"))
    }

    /// Matches the order and runs the procedure its code stands for.
    pub async fn process(&self, document_id: &str, order: &NewOrder) -> Result<(), HandlerError> {
        let order_id = order.order.id.as_str();
        debug!(document_id, order_id, state = ?OrderState::Received, "processing order");

        let response = self
            .match_patients(document_id, vec![MatchCriterion::MrnDateOfBirth], None)
            .await?;
        if !response.settings.enabled {
            info!(document_id, order_id, "ehr integration disabled for clinic, ignoring order");
            return Ok(());
        }
        let clinic_id = response
            .clinic
            .id
            .clone()
            .ok_or_else(|| HandlerError::Failed(format!("order {document_id} matched no clinic")))?;
        debug!(document_id, order_id, clinic_id, state = ?OrderState::Matched, "order matched");

        let Some(code) = order.procedure_code() else {
            info!(document_id, order_id, "order without procedure code, ignoring");
            return Ok(());
        };
        let Some(procedure) = Procedure::classify(code, &response.settings.procedure_codes) else {
            info!(document_id, order_id, code, "unknown procedure code, ignoring");
            return Ok(());
        };

        let matched = MatchedOrder {
            document_id,
            order,
            clinic_id,
            clinic: response.clinic,
            settings: response.settings,
        };
        debug!(document_id, order_id, ?procedure, state = ?OrderState::Dispatched, "order dispatched");

        let result = match procedure {
            Procedure::EnableReports => self.enable_reports(&matched, false).await,
            Procedure::DisableReports => self.disable_reports(&matched).await,
            Procedure::CreateAccount => self.create_account(&matched).await.map(|_| ()),
            Procedure::CreateAccountAndEnableReports => {
                self.create_account_and_enable_reports(&matched).await
            }
        };
        match &result {
            Ok(()) => info!(document_id, order_id, ?procedure, state = ?OrderState::Completed, "order processed"),
            Err(error) => warn!(document_id, order_id, ?procedure, state = ?OrderState::Failed, %error, "order failed"),
        }
        result
    }

    /// Tells the provider an order could not be processed. Orders of clinics
    /// without integration are not answered.
    pub async fn report_failure(
        &self,
        document_id: &str,
        order: &NewOrder,
        message: &'static str,
    ) -> Result<(), HandlerError> {
        let response = self
            .match_patients(document_id, vec![MatchCriterion::MrnDateOfBirth], None)
            .await?;
        if !response.settings.enabled {
            return Ok(());
        }
        self.send_results(&response.settings, order, Outcome::Failure(message))
            .await
    }

    async fn send_results(
        &self,
        settings: &EhrSettings,
        order: &NewOrder,
        outcome: Outcome,
    ) -> Result<(), HandlerError> {
        let Some(destination) = settings
            .destination_ids
            .as_ref()
            .map(|ids| ids.results.as_str())
            .filter(|id| !id.is_empty())
        else {
            warn!(order_id = order.order.id, "no results destination configured, skipping results");
            return Ok(());
        };

        let results = build_results(&self.addressing(destination), order, outcome, Utc::now());
        self.gateway
            .send(&results)
            .await
            .with_context(|| format!("sending results of order {}", order.order.id))?;
        info!(order_id = order.order.id, message = outcome.message(), "results sent");
        Ok(())
    }

    /// The one patient a match found, or the failure to tell the provider.
    fn unique_patient(response: &EhrMatchResponse) -> Result<&Patient, &'static str> {
        match response.patients() {
            [] => Err(results::NO_MATCHING_PATIENT),
            [patient] => Ok(patient),
            _ => Err(results::MULTIPLE_MATCHING_PATIENTS),
        }
    }

    async fn enable_reports(
        &self,
        matched: &MatchedOrder<'_>,
        account_created: bool,
    ) -> Result<(), HandlerError> {
        let response = self
            .match_patients(
                matched.document_id,
                vec![MatchCriterion::MrnDateOfBirth],
                Some(MatchAction::EnableReports),
            )
            .await?;
        let patient = match Self::unique_patient(&response) {
            Ok(patient) => patient,
            Err(message) => {
                return self
                    .send_results(&matched.settings, matched.order, Outcome::Failure(message))
                    .await
            }
        };

        let patient = self.apply_tags(matched, &response.clinic, patient).await?;
        if !account_created {
            self.send_results(
                &matched.settings,
                matched.order,
                Outcome::Success(results::REPORTS_ENABLED),
            )
            .await?;
        }

        self.send_summary_and_report(ReportParameters {
            clinic_id: &matched.clinic_id,
            clinic: &response.clinic,
            patient: &patient,
            settings: &matched.settings,
            order: matched.order,
            document_id: None,
            preceding_document_id: None,
        })
        .await
    }

    /// Replaces the tags of the patient with those of the order. An order
    /// without tags clears them.
    async fn apply_tags(
        &self,
        matched: &MatchedOrder<'_>,
        clinic: &Clinic,
        patient: &Patient,
    ) -> Result<Patient, HandlerError> {
        let patient_id = patient
            .id
            .as_deref()
            .ok_or_else(|| HandlerError::Failed("matched patient without id".to_owned()))?;

        let names = tag_names(matched.order, &matched.settings.tags);
        let ids = if names.is_empty() {
            Vec::new()
        } else {
            resolve_tag_ids(&self.context, &matched.clinic_id, clinic, &names).await?
        };
        let updated = Patient {
            tags: Some(ids),
            ..patient.clone()
        };
        self.context
            .clinics
            .update_patient(&matched.clinic_id, patient_id, &updated)
            .await
            .with_context(|| format!("tagging patient {patient_id}"))?;
        debug!(clinic_id = matched.clinic_id, patient_id, tags = ?updated.tags, "patient tags replaced");
        Ok(updated)
    }

    async fn disable_reports(&self, matched: &MatchedOrder<'_>) -> Result<(), HandlerError> {
        let response = self
            .match_patients(
                matched.document_id,
                vec![MatchCriterion::MrnDateOfBirth],
                Some(MatchAction::DisableReports),
            )
            .await?;
        let outcome = match Self::unique_patient(&response) {
            Ok(_) => Outcome::Success(results::REPORTS_DISABLED),
            Err(message) => Outcome::Failure(message),
        };
        self.send_results(&matched.settings, matched.order, outcome)
            .await
    }

    /// Creates a custodial account for the ordered patient. Returns whether
    /// the account was created; failures are reported to the provider.
    async fn create_account(&self, matched: &MatchedOrder<'_>) -> Result<bool, HandlerError> {
        let response = self
            .match_patients(
                matched.document_id,
                vec![MatchCriterion::Mrn, MatchCriterion::DateOfBirthFullName],
                None,
            )
            .await?;
        if !response.patients().is_empty() {
            self.send_results(
                &matched.settings,
                matched.order,
                Outcome::Failure(results::PATIENT_ALREADY_EXISTS),
            )
            .await?;
            return Ok(false);
        }

        let account = match self.new_account(matched).await? {
            Ok(account) => account,
            Err(message) => {
                self.send_results(&matched.settings, matched.order, Outcome::Failure(message))
                    .await?;
                return Ok(false);
            }
        };

        self.context
            .clinics
            .create_patient_account(&matched.clinic_id, &account)
            .await
            .with_context(|| format!("creating patient account in clinic {}", matched.clinic_id))?;
        info!(clinic_id = matched.clinic_id, order_id = matched.order.order.id, "patient account created");

        self.send_results(
            &matched.settings,
            matched.order,
            Outcome::Success(results::ACCOUNT_CREATED),
        )
        .await?;
        Ok(true)
    }

    /// The account to create, or why the order does not describe one.
    async fn new_account(
        &self,
        matched: &MatchedOrder<'_>,
    ) -> Result<Result<CreatePatientAccount, &'static str>, HandlerError> {
        let order = matched.order;
        let (Some(full_name), Some(birth_date)) = (order.full_name(), order.birth_date()) else {
            return Ok(Err(results::PATIENT_DETAILS_INCOMPLETE));
        };

        let age = order.age_on(Utc::now().date_naive());
        let email = match age {
            Some(age) if age < GUARANTOR_AGE => order.guarantor_email(),
            _ => order.patient_email(),
        };
        let Some(email) = email.map(str::trim).filter(|email| !email.is_empty()) else {
            return Ok(Err(results::EMAIL_MISSING));
        };
        if !EMAIL_REGEX.is_match(email) {
            return Ok(Err(results::EMAIL_INVALID));
        }

        let existing = self
            .context
            .users
            .get_user(email)
            .await
            .context("looking up user by email")?;
        if existing.is_some() {
            return Ok(Err(results::EMAIL_IN_USE));
        }

        let names = tag_names(order, &matched.settings.tags);
        let tags = if names.is_empty() {
            Vec::new()
        } else {
            resolve_tag_ids(&self.context, &matched.clinic_id, &matched.clinic, &names).await?
        };

        Ok(Ok(CreatePatientAccount {
            full_name,
            birth_date: birth_date.format("%Y-%m-%d").to_string(),
            mrn: order.mrn().map(str::to_owned),
            email: Some(email.to_owned()),
            tags,
            permissions: Permissions::custodial(),
        }))
    }

    async fn create_account_and_enable_reports(
        &self,
        matched: &MatchedOrder<'_>,
    ) -> Result<(), HandlerError> {
        let response = self
            .match_patients(matched.document_id, vec![MatchCriterion::MrnDateOfBirth], None)
            .await?;

        let mut account_created = false;
        if response.patients().is_empty() {
            account_created = self.create_account(matched).await?;
            if !account_created {
                return Ok(());
            }
        }
        self.enable_reports(matched, account_created).await
    }

    /// Sends the glucose statistics of the patient as a flowsheet, then the
    /// PDF report as notes. Patients without statistics get nothing.
    pub async fn send_summary_and_report(
        &self,
        parameters: ReportParameters<'_>,
    ) -> Result<(), HandlerError> {
        let ReportParameters {
            clinic_id,
            clinic,
            patient,
            settings,
            order,
            document_id,
            preceding_document_id,
        } = parameters;

        let Some(destinations) = settings.destination_ids.as_ref() else {
            warn!(clinic_id, "no ehr destinations configured, skipping summary and report");
            return Ok(());
        };
        // Clinic patients are keyed by user id.
        let Some(patient_id) = patient.id.as_deref() else {
            return Err(HandlerError::Failed(format!("patient of clinic {clinic_id} without id")));
        };
        let user_id = patient.user_id.as_deref().unwrap_or(patient_id);

        let now = Utc::now();
        let observations = flowsheet::observations(
            patient.summary.as_ref(),
            clinic.preferred_bg_units,
            settings.flowsheets.icode,
            now,
        );
        if observations.is_empty() {
            info!(clinic_id, patient_id, "patient has no summary, nothing to report");
            return Ok(());
        }

        let document_id = document_id
            .map(str::to_owned)
            .unwrap_or_else(|| notes::document_id(clinic_id, patient_id));
        let replace = notes::replaces(
            settings.scheduled_reports.on_upload_note_event_type,
            preceding_document_id,
        );

        let pdf = self
            .context
            .reports
            .generate_report(&report_request(clinic, patient, user_id, now))
            .await
            .with_context(|| format!("generating report of patient {patient_id}"))?;
        let file = if self.gateway.upload_file_enabled() {
            let uri = self
                .gateway
                .upload_file(&notes::file_name(&document_id), pdf, REPORT_MIME_TYPE)
                .await
                .with_context(|| format!("uploading report {document_id}"))?;
            ReportFile::Uploaded { uri }
        } else {
            ReportFile::Embedded(pdf)
        };

        let flowsheet = Flowsheet {
            meta: self.addressing(&destinations.flowsheet).meta(
                DATA_MODEL_FLOWSHEET,
                EVENT_TYPE_NEW,
                &format_date_time(now),
            ),
            patient: order.patient.clone(),
            visit: order.visit_reference(),
            observations,
        };
        self.gateway
            .send(&flowsheet)
            .await
            .with_context(|| format!("sending flowsheet of patient {patient_id}"))?;

        let notes = notes::build_notes(
            &self.addressing(&destinations.notes),
            NotesRequest {
                order,
                document_id: &document_id,
                preceding_document_id,
                replace,
                file,
            },
            now,
        );
        self.gateway
            .send(&notes)
            .await
            .with_context(|| format!("sending report {document_id}"))?;

        info!(clinic_id, patient_id, document_id, replace, "summary and report sent");
        Ok(())
    }
}

/// The two weeks up to the most recent data of the patient.
fn report_request(
    clinic: &Clinic,
    patient: &Patient,
    user_id: &str,
    now: DateTime<Utc>,
) -> ReportRequest {
    let last_data = patient.summary.as_ref().and_then(|summary| {
        let cgm = summary.cgm_stats.as_ref().and_then(|stats| stats.dates.last_data);
        let bgm = summary.bgm_stats.as_ref().and_then(|stats| stats.dates.last_data);
        cgm.max(bgm)
    });
    let end = last_data.unwrap_or(now);

    ReportRequest {
        user_detail: UserDetail {
            user_id: user_id.to_owned(),
            full_name: patient.display_name().to_owned(),
            dob: patient.birth_date.clone().unwrap_or_default(),
            mrn: patient.mrn.clone(),
        },
        report_detail: ReportDetail {
            tz_name: clinic.timezone.clone(),
            bg_units: Some(clinic.preferred_bg_units),
            reports: REPORTS.iter().map(|report| report.to_string()).collect(),
            start_date: Some(end - Duration::days(REPORT_DAYS)),
            end_date: Some(end),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ehr::test::{gateway_processor, match_response, mock_token, order_with};
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn procedure_codes_are_configured_per_clinic() {
        let codes = ProcedureCodes {
            enable_summary_reports: Some("TP1".to_string()),
            create_account: Some("TP3".to_string()),
            ..Default::default()
        };

        assert_eq!(Procedure::classify("TP1", &codes), Some(Procedure::EnableReports));
        assert_eq!(Procedure::classify("TP3", &codes), Some(Procedure::CreateAccount));
        assert_eq!(Procedure::classify("TP2", &codes), None);
    }

    #[test]
    fn emails_are_checked_syntactically() {
        assert!(EMAIL_REGEX.is_match("jane@example.com"));
        assert!(!EMAIL_REGEX.is_match("jane@example"));
        assert!(!EMAIL_REGEX.is_match("jane doe@example.com"));
        assert!(!EMAIL_REGEX.is_match("@example.com"));
    }

    #[tokio::test]
    async fn enable_reports_tags_the_patient_and_sends_every_document() {
        let server = MockServer::start();
        mock_token(&server);
        let matches = server.mock(|when, then| {
            when.method(POST).path("/v1/redox/match");
            then.status(200).json_body(match_response(json!([{
                "id": "p1",
                "userId": "u1",
                "fullName": "Jane Doe",
                "summary": {"cgmStats": {
                    "dates": {"firstData": "2024-05-01T00:00:00Z", "lastData": "2024-05-20T00:00:00Z"},
                    "periods": {"14d": {"timeInTarget": {"percent": 0.5}}},
                }},
            }])));
        });
        let create_tag = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/clinics/c1/patient_tags")
                .json_body(json!({"name": "ADULT"}));
            then.status(200);
        });
        let refetch = server.mock(|when, then| {
            when.method(GET).path("/v1/clinics/c1");
            then.status(200).json_body(json!({
                "id": "c1",
                "patientTags": [{"id": "id1", "name": "T1D"}, {"id": "id_adult", "name": "ADULT"}],
            }));
        });
        let tag_patient = server.mock(|when, then| {
            when.method(PUT)
                .path("/v1/clinics/c1/patients/p1")
                .json_body_partial(json!({"tags": ["id_adult", "id1"]}).to_string());
            then.status(200);
        });
        let report = server.mock(|when, then| {
            when.method(POST).path("/export/report/u1");
            then.status(200).body("%PDF");
        });
        let flowsheet = server.mock(|when, then| {
            when.method(POST)
                .path("/endpoint")
                .json_body_partial(json!({"Meta": {"DataModel": "Flowsheet", "Destinations": [{"ID": "dest-flowsheet"}]}}).to_string());
            then.status(200);
        });
        let notes = server.mock(|when, then| {
            when.method(POST)
                .path("/endpoint")
                .json_body_partial(json!({
                    "Meta": {"DataModel": "Notes", "EventType": "New"},
                    "Note": {"DocumentID": "Report-c1-p1", "ContentType": "Base64 Encoded", "FileContents": "JVBERg=="},
                }).to_string());
            then.status(200);
        });
        let results = server.mock(|when, then| {
            when.method(POST)
                .path("/endpoint")
                .json_body_partial(json!({
                    "Meta": {"DataModel": "Results"},
                    "Orders": [{"Results": [{"Value": "SUCCESS"}, {"Value": "Summary reports enabled"}]}],
                }).to_string());
            then.status(200);
        });

        let order = order_with("ENABLE", json!([{"Code": "TIDEPOOL_TAGS", "Value": "T1D,ADULT"}]));
        gateway_processor(&server).process("e1", &order).await.unwrap();

        matches.assert_hits(2);
        create_tag.assert();
        refetch.assert();
        tag_patient.assert();
        report.assert();
        flowsheet.assert();
        notes.assert();
        results.assert();
    }

    #[tokio::test]
    async fn create_account_reports_emails_in_use() {
        let server = MockServer::start();
        mock_token(&server);
        server.mock(|when, then| {
            when.method(POST).path("/v1/redox/match");
            then.status(200).json_body(match_response(json!([])));
        });
        let lookup = server.mock(|when, then| {
            when.method(GET).path("/auth/user/jane@example.com");
            then.status(200).json_body(json!({"userid": "u9", "username": "jane@example.com"}));
        });
        let create = server.mock(|when, then| {
            when.method(POST).path("/v1/clinics/c1/patients");
            then.status(200);
        });
        let results = server.mock(|when, then| {
            when.method(POST)
                .path("/endpoint")
                .json_body_partial(json!({
                    "Meta": {"DataModel": "Results"},
                    "Orders": [{"Results": [{"Value": "FAILURE"}, {"Value": "the email address is already in use"}]}],
                }).to_string());
            then.status(200);
        });

        let order = order_with("CREATE", json!([]));
        gateway_processor(&server).process("e1", &order).await.unwrap();

        lookup.assert();
        create.assert_hits(0);
        results.assert();
    }

    #[tokio::test]
    async fn create_account_makes_custodial_accounts() {
        let server = MockServer::start();
        mock_token(&server);
        server.mock(|when, then| {
            when.method(POST).path("/v1/redox/match");
            then.status(200).json_body(match_response(json!([])));
        });
        server.mock(|when, then| {
            when.method(GET).path("/auth/user/jane@example.com");
            then.status(404);
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/clinics/c1/patients")
                .json_body_partial(json!({
                    "fullName": "Jane Doe",
                    "birthDate": "1980-06-15",
                    "mrn": "M456",
                    "email": "jane@example.com",
                    "permissions": {"custodian": {}, "view": {}, "upload": {}, "note": {}},
                }).to_string());
            then.status(409);
        });
        let results = server.mock(|when, then| {
            when.method(POST)
                .path("/endpoint")
                .json_body_partial(json!({"Orders": [{"Results": [{"Value": "SUCCESS"}, {"Value": "Account created"}]}]}).to_string());
            then.status(200);
        });

        let order = order_with("CREATE", json!([]));
        gateway_processor(&server).process("e1", &order).await.unwrap();

        create.assert();
        results.assert();
    }

    // Plain matches carry no action after their criteria
    const PLAIN_MATCH: &str = r#""criteria":["MRN_DATE_OF_BIRTH"]}"#;
    const ACCOUNT_MATCH: &str = "DATE_OF_BIRTH_FULL_NAME";
    const ENABLE_MATCH: &str = r#""onUniqueMatch":"ENABLE_REPORTS""#;

    fn results_with(message: &str) -> String {
        json!({"Orders": [{"Results": [{}, {"Value": message}]}]}).to_string()
    }

    #[tokio::test]
    async fn orders_without_tags_clear_the_patient_tags() {
        let server = MockServer::start();
        mock_token(&server);
        server.mock(|when, then| {
            when.method(POST).path("/v1/redox/match");
            then.status(200)
                .json_body(match_response(json!([{"id": "p1", "userId": "u1", "tags": ["id1"]}])));
        });
        let untag = server.mock(|when, then| {
            when.method(PUT)
                .path("/v1/clinics/c1/patients/p1")
                .body_contains(r#""tags":[]"#);
            then.status(200);
        });
        let results = server.mock(|when, then| {
            when.method(POST)
                .path("/endpoint")
                .json_body_partial(results_with(results::REPORTS_ENABLED));
            then.status(200);
        });

        let order = order_with("ENABLE", json!([{"Code": "OTHER", "Value": "T1D"}]));
        gateway_processor(&server).process("e1", &order).await.unwrap();

        untag.assert();
        results.assert();
    }

    #[tokio::test]
    async fn multiple_matches_are_reported() {
        let server = MockServer::start();
        mock_token(&server);
        server.mock(|when, then| {
            when.method(POST).path("/v1/redox/match");
            then.status(200)
                .json_body(match_response(json!([{"id": "p1"}, {"id": "p2"}])));
        });
        let update = server.mock(|when, then| {
            when.method(PUT).path_contains("/v1/clinics/c1/patients/");
            then.status(200);
        });
        let results = server.mock(|when, then| {
            when.method(POST)
                .path("/endpoint")
                .json_body_partial(results_with(results::MULTIPLE_MATCHING_PATIENTS));
            then.status(200);
        });

        let order = order_with("ENABLE", json!([]));
        gateway_processor(&server).process("e1", &order).await.unwrap();

        update.assert_hits(0);
        results.assert();
    }

    #[tokio::test]
    async fn created_accounts_get_reports_without_a_second_success() {
        let server = MockServer::start();
        mock_token(&server);
        let plain = server.mock(|when, then| {
            when.method(POST).path("/v1/redox/match").body_contains(PLAIN_MATCH);
            then.status(200).json_body(match_response(json!([])));
        });
        let account = server.mock(|when, then| {
            when.method(POST).path("/v1/redox/match").body_contains(ACCOUNT_MATCH);
            then.status(200).json_body(match_response(json!([])));
        });
        let enable = server.mock(|when, then| {
            when.method(POST).path("/v1/redox/match").body_contains(ENABLE_MATCH);
            then.status(200)
                .json_body(match_response(json!([{"id": "p1", "userId": "u1"}])));
        });
        server.mock(|when, then| {
            when.method(GET).path("/auth/user/jane@example.com");
            then.status(404);
        });
        let create = server.mock(|when, then| {
            when.method(POST).path("/v1/clinics/c1/patients");
            then.status(200);
        });
        let tag_patient = server.mock(|when, then| {
            when.method(PUT).path("/v1/clinics/c1/patients/p1");
            then.status(200);
        });
        let created = server.mock(|when, then| {
            when.method(POST)
                .path("/endpoint")
                .json_body_partial(results_with(results::ACCOUNT_CREATED));
            then.status(200);
        });
        let enabled = server.mock(|when, then| {
            when.method(POST)
                .path("/endpoint")
                .json_body_partial(results_with(results::REPORTS_ENABLED));
            then.status(200);
        });

        let order = order_with("CREATE_AND_ENABLE", json!([]));
        gateway_processor(&server).process("e1", &order).await.unwrap();

        plain.assert_hits(2);
        account.assert();
        enable.assert();
        create.assert();
        tag_patient.assert();
        created.assert();
        enabled.assert_hits(0);
    }

    #[tokio::test]
    async fn failed_account_creation_stops_create_and_enable() {
        let server = MockServer::start();
        mock_token(&server);
        let matches = server.mock(|when, then| {
            when.method(POST).path("/v1/redox/match");
            then.status(200).json_body(match_response(json!([])));
        });
        server.mock(|when, then| {
            when.method(GET).path("/auth/user/jane@example.com");
            then.status(200).json_body(json!({"userid": "u9", "username": "jane@example.com"}));
        });
        let writes = server.mock(|when, then| {
            when.path_contains("/v1/clinics/c1/patients");
            then.status(200);
        });
        let report = server.mock(|when, then| {
            when.path_contains("/export/report");
            then.status(200).body("%PDF");
        });
        let results = server.mock(|when, then| {
            when.method(POST)
                .path("/endpoint")
                .json_body_partial(results_with(results::EMAIL_IN_USE));
            then.status(200);
        });

        let order = order_with("CREATE_AND_ENABLE", json!([]));
        gateway_processor(&server).process("e1", &order).await.unwrap();

        matches.assert_hits(3);
        writes.assert_hits(0);
        report.assert_hits(0);
        results.assert();
    }

    #[tokio::test]
    async fn young_patients_are_reached_through_their_guarantor() {
        let server = MockServer::start();
        mock_token(&server);
        server.mock(|when, then| {
            when.method(POST).path("/v1/redox/match");
            then.status(200).json_body(match_response(json!([])));
        });
        let patient_lookup = server.mock(|when, then| {
            when.method(GET).path("/auth/user/kid@example.com");
            then.status(404);
        });
        let guarantor_lookup = server.mock(|when, then| {
            when.method(GET).path("/auth/user/parent@example.com");
            then.status(404);
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/clinics/c1/patients")
                .json_body_partial(json!({"email": "parent@example.com"}).to_string());
            then.status(200);
        });
        server.mock(|when, then| {
            when.method(POST).path("/endpoint");
            then.status(200);
        });
        let birth_date = Utc::now().date_naive() - Duration::days(5 * 365);
        let order: NewOrder = serde_json::from_value(json!({
            "Meta": {"DataModel": "Order", "EventType": "New"},
            "Patient": {
                "Identifiers": [{"ID": "M789", "IDType": "MRN"}],
                "Demographics": {
                    "FirstName": "Sam",
                    "LastName": "Doe",
                    "DOB": birth_date.format("%Y-%m-%d").to_string(),
                    "EmailAddresses": ["kid@example.com"],
                },
            },
            "Visit": {
                "VisitNumber": "V2",
                "Guarantor": {"EmailAddresses": ["parent@example.com"]},
            },
            "Order": {"ID": "o2", "Procedure": {"Code": "CREATE"}},
        }))
        .unwrap();

        gateway_processor(&server).process("e1", &order).await.unwrap();

        guarantor_lookup.assert();
        patient_lookup.assert_hits(0);
        create.assert();
    }

    #[tokio::test]
    async fn disable_without_match_reports_it() {
        let server = MockServer::start();
        mock_token(&server);
        server.mock(|when, then| {
            when.method(POST).path("/v1/redox/match");
            then.status(200).json_body(match_response(json!([])));
        });
        let results = server.mock(|when, then| {
            when.method(POST)
                .path("/endpoint")
                .json_body_partial(json!({"Orders": [{"Results": [{"Value": "FAILURE"}, {"Value": "no matching patient found"}]}]}).to_string());
            then.status(200);
        });

        let order = order_with("DISABLE", json!([]));
        gateway_processor(&server).process("e1", &order).await.unwrap();

        results.assert();
    }

    #[tokio::test]
    async fn disabled_clinics_and_unknown_codes_are_ignored() {
        for (enabled, code) in [(false, "ENABLE"), (true, "UNKNOWN")] {
            let server = MockServer::start();
            let mut response = match_response(json!([]));
            response["settings"]["enabled"] = json!(enabled);
            let matches = server.mock(|when, then| {
                when.method(POST).path("/v1/redox/match");
                then.status(200).json_body(response);
            });
            let endpoint = server.mock(|when, then| {
                when.method(POST).path("/endpoint");
                then.status(200);
            });

            gateway_processor(&server)
                .process("e1", &order_with(code, json!([])))
                .await
                .unwrap();

            matches.assert_hits(1);
            endpoint.assert_hits(0);
        }
    }

    #[tokio::test]
    async fn match_failures_are_retriable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/redox/match");
            then.status(200);
        });

        let error = gateway_processor(&server)
            .process("e1", &order_with("ENABLE", json!([])))
            .await
            .unwrap_err();

        assert!(error.is_retriable());
    }
}
