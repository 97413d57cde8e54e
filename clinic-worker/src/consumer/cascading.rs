//! Delayed retries through a chain of topics.
//!
//! Stage 0 consumes the source topic, stage `n` consumes `{topic}.retry-{n}`.
//! A record that fails with a retriable error is republished to the next
//! stage and committed, so a failing record never blocks its partition. The
//! consumer of a stage holds each record until it is at least as old as the
//! stage delay. Records failing on the last stage are given up on.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use clinic_common::metrics::record_handler_outcome;
use clinic_common::retry::DelayStages;
use common_kafka::kafka_consumer::{ConsumedMessage, MessageProcessor, ProcessError};
use common_kafka::kafka_producer::{send_raw_to_kafka, KafkaContext, KafkaProduceError};
use common_kafka::{ORIGINAL_TOPIC_HEADER, RETRY_STAGE_HEADER};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::FutureProducer;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::RecordHandler;
use crate::error::HandlerError;

/// Moves a record to a delay stage topic.
#[async_trait]
pub trait Republisher: Send + Sync {
    async fn republish(
        &self,
        topic: &str,
        message: &ConsumedMessage,
        stage: usize,
    ) -> Result<(), KafkaProduceError>;
}

/// Headers of a republished record: the original ones, plus the stage and the
/// topic the record was first consumed from.
pub fn retry_headers(message: &ConsumedMessage, stage: usize) -> Vec<(String, Option<Vec<u8>>)> {
    let original_topic = message
        .header_str(ORIGINAL_TOPIC_HEADER)
        .unwrap_or(&message.topic)
        .to_owned();

    let mut headers: Vec<(String, Option<Vec<u8>>)> = message
        .headers
        .iter()
        .filter(|(key, _)| key != RETRY_STAGE_HEADER && key != ORIGINAL_TOPIC_HEADER)
        .cloned()
        .collect();
    headers.push((
        RETRY_STAGE_HEADER.to_owned(),
        Some(stage.to_string().into_bytes()),
    ));
    headers.push((ORIGINAL_TOPIC_HEADER.to_owned(), Some(original_topic.into_bytes())));
    headers
}

pub struct KafkaRepublisher {
    producer: FutureProducer<KafkaContext>,
}

impl KafkaRepublisher {
    pub fn new(producer: FutureProducer<KafkaContext>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl Republisher for KafkaRepublisher {
    async fn republish(
        &self,
        topic: &str,
        message: &ConsumedMessage,
        stage: usize,
    ) -> Result<(), KafkaProduceError> {
        let headers = retry_headers(message, stage)
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key: key.as_str(),
                    value: value.as_deref(),
                })
            });

        send_raw_to_kafka(
            &self.producer,
            topic,
            message.key.as_deref(),
            message.payload.as_deref().unwrap_or_default(),
            Some(headers),
        )
        .await
    }
}

/// The consumer of one stage of a delay pipeline.
pub struct CascadingConsumer {
    handler: Arc<dyn RecordHandler>,
    republisher: Arc<dyn Republisher>,
    stages: DelayStages,
    stage: usize,
    base_topic: String,
}

impl CascadingConsumer {
    pub fn new(
        handler: Arc<dyn RecordHandler>,
        republisher: Arc<dyn Republisher>,
        stages: DelayStages,
        stage: usize,
        base_topic: &str,
    ) -> Self {
        Self {
            handler,
            republisher,
            stages,
            stage,
            base_topic: base_topic.to_owned(),
        }
    }

    async fn give_up(&self, message: &ConsumedMessage, error: &HandlerError) {
        let name = self.handler.name();
        warn!(
            handler = name,
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            stage = self.stage,
            "giving up on record: {}",
            error
        );
        metrics::counter!("cascade_abandoned_total", "handler" => name.to_owned()).increment(1);
        self.handler.on_abandon(message, error).await;
    }
}

#[async_trait]
impl MessageProcessor for CascadingConsumer {
    async fn process(
        &self,
        message: &ConsumedMessage,
        shutdown: &CancellationToken,
    ) -> Result<(), ProcessError> {
        let name = self.handler.name();

        let delay = self.stages.delay(self.stage).unwrap_or_default();
        if let Some(wait) = delay.checked_sub(message.age()).filter(|wait| !wait.is_zero()) {
            info!(
                handler = name,
                stage = self.stage,
                offset = message.offset,
                wait = ?wait,
                "holding record until its retry is due"
            );
            tokio::select! {
                _ = shutdown.cancelled() => return Err(ProcessError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }

        let started = Instant::now();
        let error = match self.handler.handle(message).await {
            Ok(()) => {
                record_handler_outcome(name, "success", started);
                return Ok(());
            }
            Err(error) => error,
        };

        if !error.is_retriable() || self.stages.is_last(self.stage) {
            record_handler_outcome(name, "abandoned", started);
            self.give_up(message, &error).await;
            return Ok(());
        }

        record_handler_outcome(name, "error", started);
        let next = self.stage + 1;
        let topic = DelayStages::topic(&self.base_topic, next);
        self.republisher
            .republish(&topic, message, next)
            .await
            .map_err(|produce_error| {
                ProcessError::Failed(format!(
                    "failed to republish record to {topic}: {produce_error}"
                ))
            })?;

        warn!(
            handler = name,
            topic = %message.topic,
            offset = message.offset,
            next_topic = %topic,
            "failed to handle record, moved to the next retry stage: {}",
            error
        );
        metrics::counter!("cascade_republished_total", "handler" => name.to_owned(), "stage" => next.to_string())
            .increment(1);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use super::test::MemoryRepublisher;
    use super::*;
    use crate::consumer::test::{message, ScriptedHandler};

    fn stages() -> DelayStages {
        DelayStages::new([60, 300].map(Duration::from_secs))
    }

    fn consumer(
        handler: &Arc<ScriptedHandler>,
        republisher: &Arc<MemoryRepublisher>,
        stage: usize,
    ) -> CascadingConsumer {
        CascadingConsumer::new(
            handler.clone(),
            republisher.clone(),
            stages(),
            stage,
            "clinic.redox",
        )
    }

    fn unavailable() -> Result<(), HandlerError> {
        Err(HandlerError::Failed("gateway unavailable".to_string()))
    }

    fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64
    }

    #[tokio::test]
    async fn retriable_failures_move_to_the_next_stage() {
        let handler = Arc::new(ScriptedHandler::new(vec![unavailable()]));
        let republisher = Arc::new(MemoryRepublisher::default());
        let mut record = message("clinic.redox", r#"{"_id":"m1"}"#);
        record.headers = vec![("traceparent".to_string(), Some(b"00-abc".to_vec()))];

        let result = consumer(&handler, &republisher, 0)
            .process(&record, &CancellationToken::new())
            .await;

        assert!(result.is_ok());
        let records = republisher.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        let (topic, republished) = &records[0];
        assert_eq!(topic, "clinic.redox.retry-1");
        assert_eq!(republished.key, record.key);
        assert_eq!(republished.payload, record.payload);
        assert_eq!(republished.header_str("traceparent"), Some("00-abc"));
        assert_eq!(republished.header_str(RETRY_STAGE_HEADER), Some("1"));
        assert_eq!(
            republished.header_str(ORIGINAL_TOPIC_HEADER),
            Some("clinic.redox")
        );
        assert!(handler.abandoned().is_empty());
    }

    #[test]
    fn stage_headers_are_replaced_not_duplicated() {
        let record = ConsumedMessage {
            topic: "clinic.redox.retry-1".to_string(),
            headers: vec![
                (RETRY_STAGE_HEADER.to_string(), Some(b"1".to_vec())),
                (ORIGINAL_TOPIC_HEADER.to_string(), Some(b"clinic.redox".to_vec())),
            ],
            ..Default::default()
        };

        let headers = retry_headers(&record, 2);

        assert_eq!(
            headers,
            vec![
                (RETRY_STAGE_HEADER.to_string(), Some(b"2".to_vec())),
                (ORIGINAL_TOPIC_HEADER.to_string(), Some(b"clinic.redox".to_vec())),
            ]
        );
    }

    #[tokio::test]
    async fn failures_on_the_last_stage_are_abandoned() {
        let handler = Arc::new(ScriptedHandler::new(vec![unavailable()]));
        let republisher = Arc::new(MemoryRepublisher::default());
        let mut record = message("clinic.redox.retry-2", "{}");
        record.timestamp = Some(now_millis() - 600_000);

        let result = consumer(&handler, &republisher, 2)
            .process(&record, &CancellationToken::new())
            .await;

        assert!(result.is_ok());
        assert!(republisher.records.lock().unwrap().is_empty());
        assert_eq!(handler.abandoned(), vec!["gateway unavailable".to_string()]);
    }

    #[tokio::test]
    async fn bad_records_are_abandoned_on_any_stage() {
        let handler = Arc::new(ScriptedHandler::new(vec![Err(HandlerError::Invalid(
            "order without procedure".to_string(),
        ))]));
        let republisher = Arc::new(MemoryRepublisher::default());

        let result = consumer(&handler, &republisher, 0)
            .process(&message("clinic.redox", "{}"), &CancellationToken::new())
            .await;

        assert!(result.is_ok());
        assert!(republisher.records.lock().unwrap().is_empty());
        assert_eq!(handler.abandoned().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn young_records_wait_for_the_stage_delay() {
        let handler = Arc::new(ScriptedHandler::new(vec![]));
        let republisher = Arc::new(MemoryRepublisher::default());
        let mut record = message("clinic.redox.retry-1", "{}");
        record.timestamp = Some(now_millis() - 20_000);

        let started = tokio::time::Instant::now();
        let result = consumer(&handler, &republisher, 1)
            .process(&record, &CancellationToken::new())
            .await;

        assert!(result.is_ok());
        assert_eq!(handler.calls(), 1);
        assert!(started.elapsed() >= Duration::from_secs(35));
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_wait() {
        let handler = Arc::new(ScriptedHandler::new(vec![]));
        let republisher = Arc::new(MemoryRepublisher::default());
        let mut record = message("clinic.redox.retry-1", "{}");
        record.timestamp = Some(now_millis());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = consumer(&handler, &republisher, 1)
            .process(&record, &shutdown)
            .await;

        assert!(matches!(result, Err(ProcessError::Cancelled)));
        assert_eq!(handler.calls(), 0);
    }
}
