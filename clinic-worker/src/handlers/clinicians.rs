use std::sync::Arc;

use async_trait::async_trait;
use clinic_common::cdc::{Event, OperationType};
use clinic_common::clients::mailer::TEMPLATE_CLINICIAN_PERMISSIONS_UPDATED;
use clinic_common::clients::EmailTemplateEvent;
use clinic_common::models::{Clinician, RolesUpdate};
use tracing::{debug, info, warn};

use crate::consumer::EventHandler;
use crate::context::AppContext;
use crate::error::{ClientResultExt, HandlerError};

const ROLES_UPDATES_FIELD: &str = "rolesUpdates";

/// Notifies clinicians whose roles were changed by another clinician.
pub struct CliniciansHandler {
    context: Arc<AppContext>,
}

impl CliniciansHandler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

/// The roles update that triggered the event: the last one recorded.
fn triggering_update(event: &Event<Clinician>) -> Option<RolesUpdate> {
    let updated = event
        .updated_value(ROLES_UPDATES_FIELD)
        .and_then(|value| serde_json::from_value::<Vec<RolesUpdate>>(value.clone()).ok());

    match updated {
        Some(mut updates) => updates.pop(),
        None => event
            .full_document
            .as_ref()
            .and_then(|clinician| clinician.roles_updates.last().cloned()),
    }
}

#[async_trait]
impl EventHandler for CliniciansHandler {
    type Document = Clinician;

    fn name(&self) -> &str {
        "clinicians"
    }

    async fn handle_event(&self, event: Event<Clinician>) -> Result<(), HandlerError> {
        if event.operation_type != OperationType::Update || !event.field_updated(ROLES_UPDATES_FIELD)
        {
            return Ok(());
        }
        let Some(clinician) = event.full_document.as_ref() else {
            debug!(offset = event.offset, "roles update without clinician");
            return Ok(());
        };
        let (Some(clinic_id), Some(user_id)) =
            (clinician.clinic_id.as_deref(), clinician.user_id.as_deref())
        else {
            return Err(HandlerError::Invalid(
                "clinician without clinicId or userId".to_string(),
            ));
        };
        let Some(update) = triggering_update(&event) else {
            return Ok(());
        };

        let updater = async {
            match update.updated_by.as_deref() {
                Some(updated_by) => self.context.clinics.get_clinician(clinic_id, updated_by).await,
                None => Ok(None),
            }
        };
        let (updater, user, clinic) = tokio::try_join!(
            updater,
            self.context.users.get_user(user_id),
            self.context.clinics.get_clinic(clinic_id),
        )
        .with_context(|| format!("looking up roles update of clinician {user_id}"))?;

        let Some(email) = user.as_ref().and_then(|user| user.email()) else {
            info!(user_id, "user was deleted, skipping roles update email");
            return Ok(());
        };

        let clinic_name = clinic.and_then(|clinic| clinic.name).unwrap_or_default();
        let updated_by = updater
            .and_then(|updater| updater.name)
            .unwrap_or_default();
        let email = EmailTemplateEvent::new(email, TEMPLATE_CLINICIAN_PERMISSIONS_UPDATED)
            .with_variable("ClinicName", clinic_name)
            .with_variable("UpdatedByName", updated_by)
            .with_variable("Roles", update.roles.join(","));
        self.context.mailer.send(email).await?;
        info!(user_id, clinic_id, "roles update email sent");

        if let Err(error) = self.context.marketing.refresh_user(user_id).await {
            warn!(user_id, "failed to refresh marketing attributes: {}", error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test::{decode, test_context};
    use httpmock::prelude::*;
    use serde_json::json;

    fn roles_update() -> Event<Clinician> {
        decode(json!({
            "operationType": "update",
            "documentKey": {"_id": "cl1"},
            "fullDocument": {
                "_id": "cl1",
                "clinicId": "c1",
                "userId": "u1",
                "roles": ["CLINIC_MEMBER"],
                "rolesUpdates": [
                    {"updatedBy": "admin0", "roles": ["CLINIC_ADMIN"]},
                    {"updatedBy": "admin1", "roles": ["CLINIC_MEMBER"]},
                ],
            },
            "updateDescription": {
                "updatedFields": {
                    "roles": ["CLINIC_MEMBER"],
                    "rolesUpdates": [
                        {"updatedBy": "admin0", "roles": ["CLINIC_ADMIN"]},
                        {"updatedBy": "admin1", "roles": ["CLINIC_MEMBER"]},
                    ],
                },
            },
        }))
    }

    fn mock_clinic_and_updater(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET).path("/v1/clinics/c1/clinicians/admin1");
            then.status(200)
                .json_body(json!({"id": "admin1", "name": "Dr Admin", "roles": ["CLINIC_ADMIN"]}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/v1/clinics/c1");
            then.status(200).json_body(json!({"id": "c1", "name": "Acme"}));
        });
    }

    #[tokio::test]
    async fn deleted_users_get_no_email() {
        let server = MockServer::start();
        mock_clinic_and_updater(&server);
        server.mock(|when, then| {
            when.method(GET).path("/auth/user/u1");
            then.status(404);
        });
        let marketing = server.mock(|when, then| {
            when.method(POST).path("/v1/users/u1/marketo");
            then.status(200);
        });
        let (context, mailer) = test_context(&server);

        CliniciansHandler::new(context)
            .handle_event(roles_update())
            .await
            .unwrap();

        assert!(mailer.sent().is_empty());
        marketing.assert_hits(0);
    }

    #[tokio::test]
    async fn last_roles_update_is_notified() {
        let server = MockServer::start();
        mock_clinic_and_updater(&server);
        server.mock(|when, then| {
            when.method(GET).path("/auth/user/u1");
            then.status(200)
                .json_body(json!({"userid": "u1", "username": "member@example.com", "emails": ["member@example.com"]}));
        });
        let marketing = server.mock(|when, then| {
            when.method(POST).path("/v1/users/u1/marketo");
            then.status(500);
        });
        let (context, mailer) = test_context(&server);

        CliniciansHandler::new(context)
            .handle_event(roles_update())
            .await
            .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "member@example.com");
        assert_eq!(sent[0].template, TEMPLATE_CLINICIAN_PERMISSIONS_UPDATED);
        assert_eq!(sent[0].variables["ClinicName"], "Acme");
        assert_eq!(sent[0].variables["UpdatedByName"], "Dr Admin");
        assert_eq!(sent[0].variables["Roles"], "CLINIC_MEMBER");
        marketing.assert();
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
            "documentKey": {"_id": "cl1"},
            "fullDocument": {"_id": "cl1", "clinicId": "c1", "userId": "u1", "name": "Dr Who"},
            "updateDescription": {"updatedFields": {"name": "Dr Who"}},
        }));
        let (context, mailer) = test_context(&server);

        CliniciansHandler::new(context).handle_event(event).await.unwrap();

        any.assert_hits(0);
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn lookup_failures_are_retriable() {
        let server = MockServer::start();
        mock_clinic_and_updater(&server);
        server.mock(|when, then| {
            when.method(GET).path("/auth/user/u1");
            then.status(502);
        });
        let (context, mailer) = test_context(&server);

        let error = CliniciansHandler::new(context)
            .handle_event(roles_update())
            .await
            .unwrap_err();

        assert!(error.is_retriable());
        assert!(mailer.sent().is_empty());
    }
}
