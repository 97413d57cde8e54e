use std::sync::Arc;

use async_trait::async_trait;
use clinic_common::cdc::{Event, OperationType};
use clinic_common::models::{StoredSummary, SummaryType};
use tracing::{debug, info};

use super::summary_export::patient_summary;
use crate::consumer::EventHandler;
use crate::context::AppContext;
use crate::error::{ClientResultExt, HandlerError};

/// Update reasons meaning new data was uploaded.
const UPLOAD_REASONS: [&str; 3] = [
    "LEGACY_DATA_ADDED",
    "LEGACY_UPLOAD_COMPLETED",
    "UPLOAD_COMPLETED",
];

/// Whether the summary was recalculated after an upload and is up to date,
/// so EHR integrations can be sent fresh data.
fn should_trigger_ehr_sync(summary: &StoredSummary) -> bool {
    matches!(summary.summary_type, SummaryType::Cgm | SummaryType::Bgm)
        && summary.dates.outdated_reason.is_empty()
        && summary
            .dates
            .last_updated_reason
            .iter()
            .any(|reason| UPLOAD_REASONS.contains(&reason.as_str()))
}

/// Copies data service summaries onto clinic patients.
pub struct SummariesHandler {
    context: Arc<AppContext>,
}

impl SummariesHandler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    async fn delete(&self, summary_id: &str) -> Result<(), HandlerError> {
        match self.context.clinics.delete_patient_summary(summary_id).await {
            Ok(()) => {
                info!(summary_id, "patient summary deleted");
                Ok(())
            }
            Err(error) if error.is_not_found() => {
                debug!(summary_id, "patient summary already deleted");
                Ok(())
            }
            Err(error) => Err(error).with_context(|| format!("deleting summary {summary_id}")),
        }
    }

    async fn update(&self, user_id: &str, summary: &StoredSummary) -> Result<(), HandlerError> {
        let Some(update) = patient_summary(summary) else {
            debug!(user_id, "ignoring summary of unknown type");
            return Ok(());
        };

        match self
            .context
            .clinics
            .update_patient_summary(user_id, &update)
            .await
        {
            Ok(()) => info!(user_id, summary_type = ?summary.summary_type, "patient summary updated"),
            Err(error) if error.is_not_found() => {
                debug!(user_id, "user is not a clinic patient");
                return Ok(());
            }
            Err(error) => {
                return Err(error).with_context(|| format!("updating summary of {user_id}"));
            }
        }

        if !should_trigger_ehr_sync(summary) {
            return Ok(());
        }
        match self.context.clinics.trigger_ehr_sync(user_id).await {
            Ok(()) => {
                info!(user_id, "ehr sync triggered");
                Ok(())
            }
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(error).with_context(|| format!("triggering ehr sync of {user_id}")),
        }
    }
}

#[async_trait]
impl EventHandler for SummariesHandler {
    type Document = StoredSummary;

    fn name(&self) -> &str {
        "summaries"
    }

    async fn handle_event(&self, event: Event<StoredSummary>) -> Result<(), HandlerError> {
        match event.operation_type {
            OperationType::Delete => match event.document_id() {
                Some(summary_id) => self.delete(summary_id).await,
                None => Ok(()),
            },
            OperationType::Insert | OperationType::Update | OperationType::Replace => {
                let Some(summary) = event.full_document.as_ref() else {
                    return Ok(());
                };
                let Some(user_id) = summary.user_id.as_deref() else {
                    return Err(HandlerError::Invalid("summary without userId".to_string()));
                };
                self.update(user_id, summary).await
            }
            OperationType::Other => Ok(()),
        }
    }
}
