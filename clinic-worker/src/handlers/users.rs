//! Handles the user lifecycle CloudEvents of the `user-events` topic.
//!
//! Events come in binary mode, with the type in the `ce_type` header and the
//! data as the record value, or in structured mode with the whole CloudEvent
//! as the value.

use std::sync::Arc;

use async_trait::async_trait;
use clinic_common::cdc::decode_document;
use clinic_common::models::user::{StructuredCloudEvent, DELETE_USER_EVENT_TYPE};
use clinic_common::models::DeleteUserEvent;
use common_kafka::kafka_consumer::ConsumedMessage;
use serde_json::Value;
use tracing::{debug, info};

use crate::consumer::RecordHandler;
use crate::context::AppContext;
use crate::error::{ClientResultExt, HandlerError};

const CLOUD_EVENT_TYPE_HEADER: &str = "ce_type";

/// The type and data of a CloudEvent record.
fn cloud_event(message: &ConsumedMessage) -> Result<(String, Value), HandlerError> {
    let payload = message.payload.as_deref().unwrap_or_default();
    if let Some(event_type) = message.header_str(CLOUD_EVENT_TYPE_HEADER) {
        return Ok((event_type.to_owned(), decode_document(payload)?));
    }
    let event: StructuredCloudEvent<Value> = decode_document(payload)?;
    Ok((event.event_type, event.data))
}

/// Detaches deleted users from their clinics.
pub struct UserEventsHandler {
    context: Arc<AppContext>,
}

impl UserEventsHandler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl RecordHandler for UserEventsHandler {
    fn name(&self) -> &str {
        "user_events"
    }

    async fn handle(&self, message: &ConsumedMessage) -> Result<(), HandlerError> {
        let (event_type, data) = cloud_event(message)?;
        if event_type != DELETE_USER_EVENT_TYPE {
            debug!(event_type, offset = message.offset, "ignoring user event");
            return Ok(());
        }

        let event: DeleteUserEvent = serde_json::from_value(data)
            .map_err(|error| HandlerError::Invalid(format!("invalid delete user event: {error}")))?;
        let user_id = event.user.user_id;
        if user_id.is_empty() {
            return Err(HandlerError::Invalid("delete user event without user id".to_string()));
        }

        match self.context.clinics.delete_user_from_clinics(&user_id).await {
            Ok(()) => info!(user_id, "deleted user removed from clinics"),
            Err(error) if error.is_not_found() => debug!(user_id, "deleted user had no clinics"),
            Err(error) => {
                return Err(error).with_context(|| format!("removing user {user_id} from clinics"))
            }
        }
        Ok(())
    }
}
