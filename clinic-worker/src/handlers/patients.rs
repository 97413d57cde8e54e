//! Keeps the profile of custodial patients in sync with the clinic record.
//!
//! Custodial accounts have no owner able to edit their profile, so the
//! demographics entered by the clinic are copied over.

use std::sync::Arc;

use async_trait::async_trait;
use clinic_common::cdc::{Event, OperationType};
use clinic_common::clients::profiles::Profile;
use clinic_common::models::Patient;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::consumer::EventHandler;
use crate::context::AppContext;
use crate::error::{ClientResultExt, HandlerError};

/// Patient fields copied to the profile, with the path they are written to.
/// `email` is also kept as the single entry of `patient.emails`.
const PROFILE_FIELDS: &[(&str, &[&str])] = &[
    ("fullName", &["fullName"]),
    ("birthDate", &["patient", "birthday"]),
    ("mrn", &["patient", "mrn"]),
    ("targetDevices", &["patient", "targetDevices"]),
    ("email", &["email"]),
];
const EMAILS_PATH: &[&str] = &["patient", "emails"];

#[derive(Debug, Clone, PartialEq)]
enum ProfileChange {
    Set(&'static [&'static str], Value),
    Remove(&'static [&'static str]),
}

/// Profile changes carried by a patient event. Inserts and replaces set every
/// field present, updates only touch the fields they updated or removed.
fn profile_changes(event: &Event<Patient>, document: &Map<String, Value>) -> Vec<ProfileChange> {
    let mut changes = Vec::new();

    for &(field, path) in PROFILE_FIELDS {
        let value = match event.operation_type {
            OperationType::Update if event.field_removed(field) => None,
            OperationType::Update if event.field_updated(field) => event
                .updated_value(field)
                .or_else(|| document.get(field))
                .cloned(),
            OperationType::Update => continue,
            _ => match document.get(field) {
                Some(value) => Some(value.clone()),
                None => continue,
            },
        };

        match value.filter(|value| !value.is_null()) {
            Some(value) => {
                if field == "email" {
                    changes.push(ProfileChange::Set(
                        EMAILS_PATH,
                        Value::Array(vec![value.clone()]),
                    ));
                }
                changes.push(ProfileChange::Set(path, value));
            }
            None => {
                if field == "email" {
                    changes.push(ProfileChange::Remove(EMAILS_PATH));
                }
                changes.push(ProfileChange::Remove(path));
            }
        }
    }

    changes
}

fn set_path(profile: &mut Profile, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = profile;
    for parent in parents {
        let entry = current
            .entry(parent.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}

fn remove_path(profile: &mut Profile, path: &[&str]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = profile;
    for parent in parents {
        match current.get_mut(*parent) {
            Some(Value::Object(next)) => current = next,
            _ => return,
        }
    }
    current.remove(*last);
}

fn apply(profile: &mut Profile, changes: &[ProfileChange]) {
    for change in changes {
        match change {
            ProfileChange::Set(path, value) => set_path(profile, path, value.clone()),
            ProfileChange::Remove(path) => remove_path(profile, path),
        }
    }
}

pub struct PatientsHandler {
    context: Arc<AppContext>,
}

impl PatientsHandler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    async fn upsert_signup_invite(&self, user_id: &str) {
        if let Err(error) = self.context.confirmation.upsert_signup_invite(user_id).await {
            warn!(user_id, "failed to upsert sign-up invite: {}", error);
        }
    }
}

#[async_trait]
impl EventHandler for PatientsHandler {
    type Document = Patient;

    fn name(&self) -> &str {
        "patients"
    }

    async fn handle_event(&self, event: Event<Patient>) -> Result<(), HandlerError> {
        if !matches!(
            event.operation_type,
            OperationType::Insert | OperationType::Update | OperationType::Replace
        ) {
            return Ok(());
        }
        let Some(patient) = event.full_document.as_ref() else {
            return Ok(());
        };
        let Some(user_id) = patient.user_id.as_deref().filter(|_| patient.is_custodial()) else {
            debug!(offset = event.offset, "not a custodial patient");
            return Ok(());
        };

        let document = match serde_json::to_value(patient) {
            Ok(Value::Object(document)) => document,
            _ => Map::new(),
        };
        let changes = profile_changes(&event, &document);
        let mut profile_written = false;

        if !changes.is_empty() {
            let profile = self
                .context
                .profiles
                .get_profile(user_id)
                .await
                .with_context(|| format!("fetching profile of {user_id}"))?
                .unwrap_or_default();

            let mut merged = profile.clone();
            apply(&mut merged, &changes);
            if merged != profile {
                self.context
                    .profiles
                    .put_profile(user_id, &merged)
                    .await
                    .with_context(|| format!("updating profile of {user_id}"))?;
                info!(user_id, "custodial profile updated");
                profile_written = true;
            }
        }

        // Invites address the profile, so they follow every profile write
        let invite = profile_written
            || event.operation_type == OperationType::Insert
            || event.field_updated("email");
        if invite && patient.email.is_some() {
            self.upsert_signup_invite(user_id).await;
        }
        Ok(())
    }
}
