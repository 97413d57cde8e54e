use std::sync::Arc;

use async_trait::async_trait;
use clinic_common::cdc::{Event, OperationType};
use clinic_common::clients::mailer::TEMPLATE_CLINIC_CREATED;
use clinic_common::clients::EmailTemplateEvent;
use clinic_common::models::Clinic;
use tracing::{info, warn};

use crate::consumer::EventHandler;
use crate::context::AppContext;
use crate::error::{ClientResultExt, HandlerError};

const LAST_DELETED_PATIENT_TAG_FIELD: &str = "lastDeletedPatientTag";

pub struct ClinicsHandler {
    context: Arc<AppContext>,
}

impl ClinicsHandler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Welcomes the admin who created the clinic.
    async fn clinic_created(&self, clinic: &Clinic) -> Result<(), HandlerError> {
        let (Some(name), Some(admin)) = (clinic.name.as_deref(), clinic.admins.first()) else {
            return Ok(());
        };

        let user = self
            .context
            .users
            .get_user(admin)
            .await
            .with_context(|| format!("looking up clinic admin {admin}"))?;
        let Some(email) = user.as_ref().and_then(|user| user.email()) else {
            info!(user_id = %admin, "clinic admin was deleted, skipping clinic created email");
            return Ok(());
        };

        let email = EmailTemplateEvent::new(email, TEMPLATE_CLINIC_CREATED)
            .with_variable("ClinicName", name);
        self.context.mailer.send(email).await?;
        info!(clinic_id = ?clinic.id, "clinic created email sent");
        Ok(())
    }

    async fn patient_tag_deleted(&self, clinic_id: &str, tag_id: &str) -> Result<(), HandlerError> {
        self.context
            .clinics
            .delete_patient_tag_from_patients(clinic_id, tag_id)
            .await
            .with_context(|| format!("removing tag {tag_id} from patients of {clinic_id}"))?;
        info!(clinic_id, tag_id, "deleted tag removed from patients");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ClinicsHandler {
    type Document = Clinic;

    fn name(&self) -> &str {
        "clinics"
    }

    async fn handle_event(&self, event: Event<Clinic>) -> Result<(), HandlerError> {
        match event.operation_type {
            OperationType::Insert => match event.full_document.as_ref() {
                Some(clinic) => self.clinic_created(clinic).await,
                None => Ok(()),
            },
            OperationType::Update if event.field_updated(LAST_DELETED_PATIENT_TAG_FIELD) => {
                let clinic_id = event.document_id().ok_or_else(|| {
                    HandlerError::Invalid("clinic update without document key".to_string())
                })?;
                let tag_id = event
                    .updated_value(LAST_DELETED_PATIENT_TAG_FIELD)
                    .and_then(|value| value.as_str())
                    .or_else(|| {
                        event
                            .full_document
                            .as_ref()
                            .and_then(|clinic| clinic.last_deleted_patient_tag.as_deref())
                    });
                match tag_id {
                    Some(tag_id) => self.patient_tag_deleted(clinic_id, tag_id).await,
                    None => {
                        warn!(clinic_id, "tag deletion without tag id");
                        Ok(())
                    }
                }
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test::{decode, test_context};
    use httpmock::prelude::*;
    use serde_json::json;

    fn clinic_insert() -> Event<Clinic> {
        decode(json!({
            "operationType": "insert",
            "documentKey": {"_id": {"$oid": "c1"}},
            "fullDocument": {
                "_id": {"$oid": "c1"},
                "name": "Acme Diabetes",
                "admins": ["u1", "u2"],
            },
        }))
    }

    #[tokio::test]
    async fn first_admin_is_welcomed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/auth/user/u1");
            then.status(200)
                .json_body(json!({"userid": "u1", "username": "admin@example.com"}));
        });
        let (context, mailer) = test_context(&server);

        ClinicsHandler::new(context)
            .handle_event(clinic_insert())
            .await
            .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "admin@example.com");
        assert_eq!(sent[0].template, TEMPLATE_CLINIC_CREATED);
        assert_eq!(sent[0].variables["ClinicName"], "Acme Diabetes");
    }

    #[tokio::test]
    async fn mailer_failures_are_retriable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/auth/user/u1");
            then.status(200)
                .json_body(json!({"userid": "u1", "username": "admin@example.com"}));
        });
        let (context, _) = test_context(&server);
        let context = Arc::new(AppContext {
            mailer: Arc::new(clinic_common::test::RecordingMailer::failing()),
            ..(*context).clone()
        });

        let error = ClinicsHandler::new(context)
            .handle_event(clinic_insert())
            .await
            .unwrap_err();

        assert!(error.is_retriable());
    }

    #[tokio::test]
    async fn deleted_tags_are_removed_from_patients() {
        let server = MockServer::start();
        let delete = server.mock(|when, then| {
            when.method(DELETE)
                .path("/v1/clinics/c1/patients/patient_tags/t1");
            then.status(204);
        });
        let event = decode(json!({
            "operationType": "update",
            "documentKey": {"_id": "c1"},
            "updateDescription": {
                "updatedFields": {"lastDeletedPatientTag": {"$oid": "t1"}},
            },
        }));
        let (context, mailer) = test_context(&server);

        ClinicsHandler::new(context).handle_event(event).await.unwrap();

        delete.assert();
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn other_updates_are_ignored() {
        let server = MockServer::start();
        let any = server.mock(|when, then| {
            when.any_request();
            then.status(500);
        });
        let event = decode(json!({
            "operationType": "update",
            "documentKey": {"_id": "c1"},
            "updateDescription": {"updatedFields": {"name": "Renamed"}},
        }));
        let (context, _) = test_context(&server);

        ClinicsHandler::new(context).handle_event(event).await.unwrap();

        any.assert_hits(0);
    }
}
