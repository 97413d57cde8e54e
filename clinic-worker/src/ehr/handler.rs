use std::sync::Arc;

use async_trait::async_trait;
use clinic_common::cdc::decode_document;
use clinic_common::ehr::{MessageEnvelope, NewOrder};
use common_kafka::kafka_consumer::ConsumedMessage;
use tracing::{debug, error, warn};

use super::processor::OrderProcessor;
use super::results::{INVALID_ORDER, PROCESSING_FAILED};
use crate::consumer::RecordHandler;
use crate::error::HandlerError;

/// Whether the envelope holds a new order, logging why it does not.
pub(crate) fn holds_new_order(envelope: &MessageEnvelope) -> bool {
    if !envelope.meta.is_valid() {
        warn!(id = envelope.id, "ehr message without data model or event type, ignoring");
        return false;
    }
    if !envelope.meta.is_new_order() {
        debug!(
            id = envelope.id,
            data_model = envelope.meta.data_model,
            event_type = envelope.meta.event_type,
            "not a new order, ignoring"
        );
        return false;
    }
    true
}

/// The new order carried by a record, `None` for any other EHR message.
fn new_order(message: &ConsumedMessage) -> Result<Option<(MessageEnvelope, NewOrder)>, HandlerError> {
    let payload = message.payload.as_deref().unwrap_or_default();
    let envelope: MessageEnvelope = decode_document(payload)?;
    if !holds_new_order(&envelope) {
        return Ok(None);
    }

    let order = envelope
        .decode_order()
        .map_err(|error| HandlerError::Invalid(format!("order {} is malformed: {error}", envelope.id)))?;
    Ok(Some((envelope, order)))
}

/// Handles the EHR messages stored by the clinic service.
pub struct EhrOrdersHandler {
    processor: Arc<OrderProcessor>,
}

impl EhrOrdersHandler {
    pub fn new(processor: Arc<OrderProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl RecordHandler for EhrOrdersHandler {
    fn name(&self) -> &str {
        "ehr_orders"
    }

    async fn handle(&self, message: &ConsumedMessage) -> Result<(), HandlerError> {
        match new_order(message)? {
            Some((envelope, order)) => self.processor.process(&envelope.id, &order).await,
            None => Ok(()),
        }
    }

    /// Orders given up on are answered with a failure. Orders that failed on
    /// unavailable services are worth placing again, invalid ones are not.
    async fn on_abandon(&self, message: &ConsumedMessage, cause: &HandlerError) {
        let Ok(Some((envelope, order))) = new_order(message) else {
            return;
        };
        warn!(id = envelope.id, order_id = order.order.id, error = %cause, "order abandoned");
        let reason = if cause.is_retriable() {
            PROCESSING_FAILED
        } else {
            INVALID_ORDER
        };
        if let Err(error) = self
            .processor
            .report_failure(&envelope.id, &order, reason)
            .await
        {
            error!(id = envelope.id, %error, "failed to report abandoned order");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::test::message;
    use crate::ehr::test::{gateway_processor, match_response, mock_token};
    use httpmock::prelude::*;
    use serde_json::json;

    fn envelope(data_model: &str, message: serde_json::Value) -> String {
        json!({
            "_id": {"$oid": "65f1c0ffee00000000000001"},
            "meta": {"DataModel": data_model, "EventType": "New"},
            "message": message,
        })
        .to_string()
    }

    #[tokio::test]
    async fn other_messages_are_ignored() {
        let server = MockServer::start();
        let any = server.mock(|when, then| {
            when.any_request();
            then.status(500);
        });
        let handler = EhrOrdersHandler::new(Arc::new(gateway_processor(&server)));

        handler
            .handle(&message("clinic.redox", &envelope("Results", json!({}))))
            .await
            .unwrap();
        handler
            .handle(&message("clinic.redox", r#"{"_id":"e1","meta":{}}"#))
            .await
            .unwrap();

        any.assert_hits(0);
    }

    #[tokio::test]
    async fn malformed_orders_are_not_retried() {
        let server = MockServer::start();
        let handler = EhrOrdersHandler::new(Arc::new(gateway_processor(&server)));

        let error = handler
            .handle(&message("clinic.redox", &envelope("Order", json!({"Order": "nope"}))))
            .await
            .unwrap_err();

        assert!(!error.is_retriable());
    }

    fn mock_abandon_results<'a>(server: &'a MockServer, reason: &str) -> httpmock::Mock<'a> {
        mock_token(server);
        server.mock(|when, then| {
            when.method(POST)
                .path("/v1/redox/match")
                .json_body_partial(json!({"messageRef": {"documentId": "65f1c0ffee00000000000001"}}).to_string());
            then.status(200).json_body(match_response(json!([])));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/endpoint")
                .json_body_partial(json!({
                    "Meta": {"DataModel": "Results"},
                    "Orders": [{"ID": "o1", "Results": [{"Value": "FAILURE"}, {"Value": reason}]}],
                }).to_string());
            then.status(200);
        })
    }

    fn abandoned_order() -> ConsumedMessage {
        message(
            "clinic.redox.retry-3",
            &envelope("Order", json!({"Order": {"ID": "o1", "Procedure": {"Code": "ENABLE"}}})),
        )
    }

    #[tokio::test]
    async fn orders_abandoned_on_transient_failures_ask_to_place_them_again() {
        let server = MockServer::start();
        let results = mock_abandon_results(&server, PROCESSING_FAILED);
        let handler = EhrOrdersHandler::new(Arc::new(gateway_processor(&server)));

        handler
            .on_abandon(&abandoned_order(), &HandlerError::Failed("gave up".to_string()))
            .await;

        results.assert();
    }

    #[tokio::test]
    async fn orders_abandoned_as_invalid_are_reported_invalid() {
        let server = MockServer::start();
        let results = mock_abandon_results(&server, INVALID_ORDER);
        let handler = EhrOrdersHandler::new(Arc::new(gateway_processor(&server)));

        handler
            .on_abandon(
                &abandoned_order(),
                &HandlerError::Invalid("unsupported order".to_string()),
            )
            .await;

        results.assert();
    }
}
