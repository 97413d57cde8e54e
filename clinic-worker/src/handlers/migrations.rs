use std::sync::Arc;

use async_trait::async_trait;
use clinic_common::cdc::{Event, OperationType};
use clinic_common::models::Migration;
use tracing::info;

use crate::consumer::EventHandler;
use crate::error::HandlerError;
use crate::migration::MigrationDriver;

/// Starts the patient migration of legacy clinician accounts.
pub struct MigrationsHandler {
    driver: MigrationDriver,
}

impl MigrationsHandler {
    pub fn new(driver: MigrationDriver) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl EventHandler for MigrationsHandler {
    type Document = Migration;

    fn name(&self) -> &str {
        "migrations"
    }

    async fn handle_event(&self, event: Event<Migration>) -> Result<(), HandlerError> {
        if event.operation_type != OperationType::Insert {
            return Ok(());
        }
        let Some(migration) = event.full_document.as_ref() else {
            return Ok(());
        };
        let (Some(clinic_id), Some(user_id)) =
            (migration.clinic_id.as_deref(), migration.user_id.as_deref())
        else {
            return Err(HandlerError::Invalid(
                "migration without clinicId or userId".to_string(),
            ));
        };

        let migrated = self.driver.migrate_patients(clinic_id, user_id).await?;
        info!(clinic_id, user_id, migrated, "legacy clinician migrated");
        Ok(())
    }
}
