use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use clinic_common::metrics::record_handler_outcome;
use clinic_common::retry::RetryPolicy;
use common_kafka::kafka_consumer::{ConsumedMessage, MessageProcessor, ProcessError};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::RecordHandler;

/// Handles a record until it succeeds, retrying at a fixed interval. Retries
/// block the partition, so records of a topic are applied in order.
///
/// Bad records are skipped with a warning. Once the attempts or the elapsed
/// budget of the policy are exhausted the consumer is stopped with the record
/// uncommitted.
pub struct RetryingConsumer {
    handler: Arc<dyn RecordHandler>,
    policy: RetryPolicy,
}

impl RetryingConsumer {
    pub fn new(handler: Arc<dyn RecordHandler>, policy: RetryPolicy) -> Self {
        Self { handler, policy }
    }
}

#[async_trait]
impl MessageProcessor for RetryingConsumer {
    async fn process(
        &self,
        message: &ConsumedMessage,
        shutdown: &CancellationToken,
    ) -> Result<(), ProcessError> {
        let name = self.handler.name();
        let mut attempt = 0;
        let first_attempt = tokio::time::Instant::now();

        loop {
            attempt += 1;
            let started = Instant::now();

            let error = match self.handler.handle(message).await {
                Ok(()) => {
                    record_handler_outcome(name, "success", started);
                    return Ok(());
                }
                Err(error) if !error.is_retriable() => {
                    record_handler_outcome(name, "skipped", started);
                    warn!(
                        handler = name,
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        "skipping record: {}",
                        error
                    );
                    return Ok(());
                }
                Err(error) => {
                    record_handler_outcome(name, "error", started);
                    error
                }
            };

            let Some(delay) = self
                .policy
                .retry_after(attempt, first_attempt.elapsed())
            else {
                error!(
                    handler = name,
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    attempt,
                    "giving up on record: {}",
                    error
                );
                return Err(ProcessError::Failed(format!(
                    "{name} failed after {attempt} attempts: {error}"
                )));
            };

            warn!(
                handler = name,
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                attempt,
                retry_in = ?delay,
                "failed to handle record: {}",
                error
            );
            metrics::counter!("handler_retries_total", "handler" => name.to_owned()).increment(1);

            tokio::select! {
                _ = shutdown.cancelled() => return Err(ProcessError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
