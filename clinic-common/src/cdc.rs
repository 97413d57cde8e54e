//! Change data capture envelopes.
//!
//! Every CDC topic carries the same outer envelope, only the shape of the
//! full document differs. Handlers bind the payload type, e.g.
//! `Event<Patient>` for `clinic.patients`.

use std::borrow::Cow;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::extended_json;

/// Decoding failures are never retried: replaying a malformed record forever
/// would stall its partition.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("record has no payload")]
    EmptyPayload,
    #[error("payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a valid event: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    /// drop, rename, invalidate and other stream level events
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DocumentKey {
    #[serde(rename = "_id")]
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescription {
    #[serde(default)]
    pub updated_fields: Map<String, Value>,
    #[serde(default)]
    pub removed_fields: Vec<String>,
}

impl UpdateDescription {
    pub fn is_empty(&self) -> bool {
        self.updated_fields.is_empty() && self.removed_fields.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event<T> {
    /// Partition offset of the record, filled in after decoding.
    #[serde(skip)]
    pub offset: i64,
    pub operation_type: OperationType,
    pub document_key: Option<DocumentKey>,
    pub full_document: Option<T>,
    pub update_description: Option<UpdateDescription>,
}

impl<T> Event<T> {
    pub fn document_id(&self) -> Option<&str> {
        self.document_key.as_ref().map(|key| key.id.as_str())
    }

    /// True when `field`, or any path below it, was set by an update.
    pub fn field_updated(&self, field: &str) -> bool {
        self.update_description.as_ref().is_some_and(|description| {
            description
                .updated_fields
                .keys()
                .any(|path| path_matches(path, field))
        })
    }

    /// True when `field`, or any path below it, was removed by an update.
    pub fn field_removed(&self, field: &str) -> bool {
        self.update_description.as_ref().is_some_and(|description| {
            description
                .removed_fields
                .iter()
                .any(|path| path_matches(path, field))
        })
    }

    pub fn updated_value(&self, field: &str) -> Option<&Value> {
        self.update_description
            .as_ref()
            .and_then(|description| description.updated_fields.get(field))
    }

    fn validate(&self) -> Result<(), DecodeError> {
        match self.operation_type {
            OperationType::Update
                if self
                    .update_description
                    .as_ref()
                    .map_or(true, UpdateDescription::is_empty) =>
            {
                Err(DecodeError::Invalid(
                    "update event without updated or removed fields".to_string(),
                ))
            }
            OperationType::Delete if self.document_key.is_none() => Err(DecodeError::Invalid(
                "delete event without document key".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

fn path_matches(path: &str, field: &str) -> bool {
    path == field
        || path
            .strip_prefix(field)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Some connectors publish the envelope as a JSON string holding the JSON
/// document. Such payloads are unquoted and unescaped exactly once.
pub fn unwrap_double_encoded(payload: &[u8]) -> Result<Cow<'_, [u8]>, DecodeError> {
    let trimmed = payload.trim_ascii();
    if trimmed.len() >= 2 && trimmed.starts_with(b"\"") && trimmed.ends_with(b"\"") {
        let inner: String = serde_json::from_slice(trimmed)?;
        return Ok(Cow::Owned(inner.into_bytes()));
    }
    Ok(Cow::Borrowed(payload))
}

/// Decodes JSON or extended JSON into any model.
pub fn decode_document<T: DeserializeOwned>(payload: &[u8]) -> Result<T, DecodeError> {
    if payload.trim_ascii().is_empty() {
        return Err(DecodeError::EmptyPayload);
    }
    let payload = unwrap_double_encoded(payload)?;
    let value: Value = serde_json::from_slice(&payload)?;
    Ok(serde_json::from_value(extended_json::normalize(value))?)
}

/// Decodes and validates a CDC envelope.
pub fn decode_event<T: DeserializeOwned>(payload: &[u8], offset: i64) -> Result<Event<T>, DecodeError> {
    let mut event: Event<T> = decode_document(payload)?;
    event.validate()?;
    event.offset = offset;
    Ok(event)
}
