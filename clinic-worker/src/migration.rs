//! Moves the patients of a legacy clinician account into a clinic.
//!
//! Patients are migrated concurrently, with at most `threadiness` in flight
//! and dispatches paced by a rate limiter so the clinic service is not
//! flooded by large accounts. The first failure stops the migration.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use clinic_common::models::Permissions;
use governor::{Quota, RateLimiter};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::context::AppContext;
use crate::error::{ClientResultExt, HandlerError};

#[derive(Debug, Clone, Copy)]
pub struct MigrationLimits {
    pub threadiness: usize,
    pub per_second: NonZeroU32,
    pub patient_timeout: Duration,
}

impl MigrationLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            threadiness: config.migration_threadiness.max(1),
            per_second: NonZeroU32::new(config.migration_rate_per_second).unwrap_or(NonZeroU32::MIN),
            patient_timeout: config.migration_patient_timeout.0,
        }
    }
}

impl Default for MigrationLimits {
    fn default() -> Self {
        Self {
            threadiness: 4,
            per_second: NonZeroU32::MIN.saturating_add(14),
            patient_timeout: Duration::from_secs(10),
        }
    }
}

pub struct MigrationDriver {
    context: Arc<AppContext>,
    limits: MigrationLimits,
}

impl MigrationDriver {
    pub fn new(context: Arc<AppContext>, limits: MigrationLimits) -> Self {
        Self { context, limits }
    }

    /// Migrates every patient sharing data with `legacy_user_id` into
    /// `clinic_id`, returning how many were migrated.
    pub async fn migrate_patients(
        &self,
        clinic_id: &str,
        legacy_user_id: &str,
    ) -> Result<usize, HandlerError> {
        let patients = self
            .context
            .sharing
            .list_shared_with(legacy_user_id)
            .await
            .with_context(|| format!("listing patients of {legacy_user_id}"))?;
        let total = patients.len();
        info!(clinic_id, legacy_user_id, total, "migrating patients");

        let permits = Arc::new(Semaphore::new(self.limits.threadiness));
        let limiter = RateLimiter::direct(Quota::per_second(self.limits.per_second));
        let failed = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for (patient_id, permissions) in patients {
            let permit = tokio::select! {
                _ = failed.cancelled() => break,
                permit = permits.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                break;
            };
            tokio::select! {
                _ = failed.cancelled() => break,
                _ = limiter.until_ready() => {}
            }

            let task = PatientMigration {
                context: self.context.clone(),
                clinic_id: clinic_id.to_owned(),
                legacy_user_id: legacy_user_id.to_owned(),
                patient_id,
                permissions,
            };
            let failed = failed.clone();
            let timeout = self.limits.patient_timeout;
            tasks.spawn(async move {
                let _permit = permit;
                let result = tokio::select! {
                    _ = failed.cancelled() => return Ok(()),
                    result = tokio::time::timeout(timeout, task.run()) => result,
                };
                let result = result.unwrap_or_else(|_| {
                    Err(HandlerError::Timeout(format!(
                        "migration of patient {}",
                        task.patient_id
                    )))
                });
                if result.is_err() {
                    failed.cancel();
                }
                result
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|join_error| HandlerError::Failed(format!("migration task failed: {join_error}")))
                .and_then(|result| result);
            if let Err(error) = result {
                failed.cancel();
                first_error.get_or_insert(error);
            }
        }

        if let Some(error) = first_error {
            error!(clinic_id, legacy_user_id, "patient migration failed: {}", error);
            return Err(error);
        }
        info!(clinic_id, legacy_user_id, total, "patients migrated");
        Ok(total)
    }
}

struct PatientMigration {
    context: Arc<AppContext>,
    clinic_id: String,
    legacy_user_id: String,
    patient_id: String,
    permissions: Permissions,
}

impl PatientMigration {
    async fn run(&self) -> Result<(), HandlerError> {
        let permissions = if self.permissions == Permissions::default() {
            Permissions::view()
        } else {
            self.permissions.clone()
        };

        self.context
            .clinics
            .create_patient_from_user(&self.clinic_id, &self.patient_id, &permissions)
            .await
            .with_context(|| format!("adding patient {} to {}", self.patient_id, self.clinic_id))?;
        self.context
            .sharing
            .revoke(&self.patient_id, &self.legacy_user_id)
            .await
            .with_context(|| format!("revoking legacy sharing of {}", self.patient_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test::test_context;
    use httpmock::prelude::*;
    use serde_json::json;

    fn limits() -> MigrationLimits {
        MigrationLimits {
            threadiness: 2,
            per_second: NonZeroU32::new(100).unwrap(),
            patient_timeout: Duration::from_secs(2),
        }
    }

    fn mock_sharers(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET).path("/access/groups/legacy");
            then.status(200).json_body(json!({
                "legacy": {"root": {}},
                "p1": {"view": {}, "upload": {}},
                "p2": {},
                "p3": {"view": {}},
            }));
        });
    }

    #[tokio::test]
    async fn migrates_every_sharing_patient() {
        let server = MockServer::start();
        mock_sharers(&server);
        let p1 = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/clinics/c1/migrate/p1")
                .json_body(json!({"permissions": {"view": {}, "upload": {}}}));
            then.status(200);
        });
        let p2 = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/clinics/c1/migrate/p2")
                .json_body(json!({"permissions": {"view": {}}}));
            then.status(409);
        });
        let p3 = server.mock(|when, then| {
            when.method(POST).path("/v1/clinics/c1/migrate/p3");
            then.status(200);
        });
        let revoke = server.mock(|when, then| {
            when.method(POST).path_matches(regex::Regex::new("^/access/p[123]/legacy$").unwrap());
            then.status(200);
        });

        let driver = MigrationDriver::new(test_context(&server).0, limits());
        let migrated = driver.migrate_patients("c1", "legacy").await.unwrap();

        assert_eq!(migrated, 3);
        p1.assert();
        p2.assert();
        p3.assert();
        revoke.assert_hits(3);
    }

    #[tokio::test]
    async fn first_failure_fails_the_migration() {
        let server = MockServer::start();
        mock_sharers(&server);
        server.mock(|when, then| {
            when.method(POST).path("/v1/clinics/c1/migrate/p1");
            then.status(500);
        });
        server.mock(|when, then| {
            when.method(POST).path_matches(regex::Regex::new("^/v1/clinics/c1/migrate/p[23]$").unwrap());
            then.status(200);
        });
        server.mock(|when, then| {
            when.method(POST).path_matches(regex::Regex::new("^/access/p[123]/legacy$").unwrap());
            then.status(200);
        });

        let driver = MigrationDriver::new(test_context(&server).0, limits());
        let error = driver.migrate_patients("c1", "legacy").await.unwrap_err();

        assert!(error.is_retriable());
        assert!(error.to_string().contains("p1"));
    }

    #[tokio::test]
    async fn slow_patients_time_out() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/access/groups/legacy");
            then.status(200).json_body(json!({"p1": {"view": {}}}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/v1/clinics/c1/migrate/p1");
            then.status(200).delay(Duration::from_millis(500));
        });

        let driver = MigrationDriver::new(
            test_context(&server).0,
            MigrationLimits {
                patient_timeout: Duration::from_millis(50),
                ..limits()
            },
        );
        let error = driver.migrate_patients("c1", "legacy").await.unwrap_err();

        assert!(matches!(error, HandlerError::Timeout(_)));
    }

    #[tokio::test]
    async fn legacy_accounts_without_patients_are_done() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/access/groups/legacy");
            then.status(404);
        });

        let driver = MigrationDriver::new(test_context(&server).0, limits());

        assert_eq!(driver.migrate_patients("c1", "legacy").await.unwrap(), 0);
    }
}
