use std::sync::Arc;

use async_trait::async_trait;
use clinic_common::cdc::Event;
use clinic_common::clients::mailer::{
    TEMPLATE_CLINICIAN_CLINIC_MERGED, TEMPLATE_PATIENT_CLINIC_MERGED,
    TEMPLATE_TARGET_ADMIN_CLINIC_MERGED,
};
use clinic_common::clients::EmailTemplateEvent;
use clinic_common::models::merge_plan::PlanClinics;
use clinic_common::models::{ClinicianAction, ClinicianMergePlan, MergePlan, PatientMergePlan};
use tracing::{debug, info};

use crate::consumer::EventHandler;
use crate::context::AppContext;
use crate::error::{ClientResultExt, HandlerError};

/// Template of the email a clinician gets for a merge step, if any.
fn clinician_template(plan: &ClinicianMergePlan) -> Option<&'static str> {
    match plan.clinician_action {
        ClinicianAction::Retain | ClinicianAction::MergeInto => {
            Some(TEMPLATE_CLINICIAN_CLINIC_MERGED)
        }
        ClinicianAction::Move | ClinicianAction::Merge if plan.becomes_admin() => {
            Some(TEMPLATE_TARGET_ADMIN_CLINIC_MERGED)
        }
        ClinicianAction::Move | ClinicianAction::Merge => None,
    }
}

fn with_clinics(email: EmailTemplateEvent, clinics: &PlanClinics) -> EmailTemplateEvent {
    email
        .with_variable(
            "SourceClinicName",
            clinics.source_clinic_name.clone().unwrap_or_default(),
        )
        .with_variable(
            "TargetClinicName",
            clinics.target_clinic_name.clone().unwrap_or_default(),
        )
}

/// Tells patients and clinicians their clinic was merged into another.
pub struct MergePlansHandler {
    context: Arc<AppContext>,
}

impl MergePlansHandler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// The plan email, or the current email of the user when the plan has none.
    async fn recipient(
        &self,
        email: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Option<String>, HandlerError> {
        if let Some(email) = email {
            return Ok(Some(email.to_owned()));
        }
        let Some(user_id) = user_id else {
            return Ok(None);
        };
        let user = self
            .context
            .users
            .get_user(user_id)
            .await
            .with_context(|| format!("looking up user {user_id}"))?;
        Ok(user.and_then(|user| user.email().map(str::to_owned)))
    }

    async fn patient_merged(&self, plan: &PatientMergePlan) -> Result<(), HandlerError> {
        let Some(recipient) = self
            .recipient(plan.email.as_deref(), plan.user_id.as_deref())
            .await?
        else {
            debug!(user_id = ?plan.user_id, "patient has no email, skipping merge notification");
            return Ok(());
        };

        let email = with_clinics(
            EmailTemplateEvent::new(recipient, TEMPLATE_PATIENT_CLINIC_MERGED),
            &plan.clinics,
        )
        .with_variable("PatientName", plan.full_name.clone().unwrap_or_default());
        self.context.mailer.send(email).await?;
        info!(user_id = ?plan.user_id, "patient merge email sent");
        Ok(())
    }

    async fn clinician_merged(&self, plan: &ClinicianMergePlan) -> Result<(), HandlerError> {
        let Some(template) = clinician_template(plan) else {
            return Ok(());
        };
        let Some(recipient) = self
            .recipient(plan.email.as_deref(), plan.user_id.as_deref())
            .await?
        else {
            debug!(user_id = ?plan.user_id, "clinician was deleted, skipping merge notification");
            return Ok(());
        };

        let email = with_clinics(EmailTemplateEvent::new(recipient, template), &plan.clinics)
            .with_variable("ClinicianName", plan.name.clone().unwrap_or_default());
        self.context.mailer.send(email).await?;
        info!(user_id = ?plan.user_id, template, "clinician merge email sent");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for MergePlansHandler {
    type Document = MergePlan;

    fn name(&self) -> &str {
        "merge_plans"
    }

    async fn handle_event(&self, event: Event<MergePlan>) -> Result<(), HandlerError> {
        match event.full_document.as_ref() {
            Some(MergePlan::Patient(plan)) => self.patient_merged(plan).await,
            Some(MergePlan::Clinician(plan)) => self.clinician_merged(plan).await,
            None => Ok(()),
        }
    }
}
