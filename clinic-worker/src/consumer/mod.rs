//! Glue between the topic consumers and the handlers.
//!
//! A `RecordHandler` turns one record into side effects. It is wrapped in a
//! `RetryingConsumer` or in the `CascadingConsumer`s of a delay pipeline,
//! which decide what happens when it fails.

pub mod cascading;
pub mod retrying;

use async_trait::async_trait;
use clinic_common::cdc::{decode_event, Event};
use common_kafka::kafka_consumer::ConsumedMessage;
use serde::de::DeserializeOwned;

use crate::error::HandlerError;

#[async_trait]
pub trait RecordHandler: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok` also covers records the handler has nothing to do with.
    async fn handle(&self, message: &ConsumedMessage) -> Result<(), HandlerError>;

    /// Called once when the record is given up on.
    async fn on_abandon(&self, _message: &ConsumedMessage, _error: &HandlerError) {}
}

/// A handler of decoded CDC events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    type Document: DeserializeOwned + Send + Sync;

    fn name(&self) -> &str;

    async fn handle_event(&self, event: Event<Self::Document>) -> Result<(), HandlerError>;

    async fn on_abandon(&self, _message: &ConsumedMessage, _error: &HandlerError) {}
}

/// Decodes CDC envelopes for an `EventHandler`.
pub struct CdcHandler<H> {
    inner: H,
}

impl<H: EventHandler> CdcHandler<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H: EventHandler> RecordHandler for CdcHandler<H> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, message: &ConsumedMessage) -> Result<(), HandlerError> {
        let payload = message.payload.as_deref().unwrap_or_default();
        let event = decode_event(payload, message.offset)?;
        self.inner.handle_event(event).await
    }

    async fn on_abandon(&self, message: &ConsumedMessage, error: &HandlerError) {
        self.inner.on_abandon(message, error).await
    }
}
