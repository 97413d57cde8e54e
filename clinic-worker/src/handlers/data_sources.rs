use std::sync::Arc;

use async_trait::async_trait;
use clinic_common::cdc::{Event, OperationType};
use clinic_common::models::data_source::PatientDataSource;
use clinic_common::models::DataSource;
use tracing::{debug, info};

use crate::consumer::EventHandler;
use crate::context::AppContext;
use crate::error::{ClientResultExt, HandlerError};

/// Mirrors the data sources of a user onto their clinic patient records.
pub struct DataSourcesHandler {
    context: Arc<AppContext>,
}

impl DataSourcesHandler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl EventHandler for DataSourcesHandler {
    type Document = DataSource;

    fn name(&self) -> &str {
        "data_sources"
    }

    async fn handle_event(&self, event: Event<DataSource>) -> Result<(), HandlerError> {
        if !matches!(
            event.operation_type,
            OperationType::Insert | OperationType::Update | OperationType::Replace
        ) {
            return Ok(());
        }
        let Some(user_id) = event
            .full_document
            .as_ref()
            .and_then(|source| source.user_id.as_deref())
        else {
            debug!(offset = event.offset, "data source without user");
            return Ok(());
        };

        // The event only carries one source, the clinic API replaces them all.
        let sources = self
            .context
            .data
            .list_data_sources(user_id)
            .await
            .with_context(|| format!("listing data sources of {user_id}"))?;
        let update: Vec<PatientDataSource> = sources.iter().map(PatientDataSource::from).collect();

        match self
            .context
            .clinics
            .update_patient_data_sources(user_id, &update)
            .await
        {
            Ok(()) => {
                info!(user_id, count = update.len(), "patient data sources updated");
                Ok(())
            }
            Err(error) if error.is_not_found() => {
                debug!(user_id, "user is not a clinic patient");
                Ok(())
            }
            Err(error) => Err(error).context("updating patient data sources"),
        }
    }
}
