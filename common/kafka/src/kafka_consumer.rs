use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use health::{ComponentStatus, HealthHandle};
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Headers};
use rdkafka::{ClientConfig, ClientContext, Message, Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConsumerConfig, KafkaConfig};

const LIVENESS_INTERVAL: Duration = Duration::from_secs(10);
const MAX_CONSECUTIVE_KAFKA_ERRORS: u32 = 60;

/// A record detached from the consumer, so it can outlive the poll that
/// produced it while a handler works on it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, Option<Vec<u8>>)>,
    /// Producer timestamp in milliseconds since the epoch
    pub timestamp: Option<i64>,
}

impl ConsumedMessage {
    pub fn from_borrowed(message: &BorrowedMessage<'_>) -> Self {
        let headers = message
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|header| (header.key.to_owned(), header.value.map(<[u8]>::to_vec)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            topic: message.topic().to_owned(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec),
            headers,
            timestamp: message.timestamp().to_millis(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header(name)
            .and_then(|value| std::str::from_utf8(value).ok())
    }

    /// Time elapsed since the record was produced. Records without a
    /// timestamp, or produced "in the future" by a skewed clock, are treated
    /// as brand new.
    pub fn age(&self) -> Duration {
        let Some(produced_at) = self.timestamp else {
            return Duration::ZERO;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        Duration::from_millis(now.saturating_sub(produced_at).max(0) as u64)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("processing was cancelled by shutdown")]
    Cancelled,
    #[error("processing failed permanently: {0}")]
    Failed(String),
}

/// The unit of work bound to a consumer. Returning `Ok` commits the record,
/// returning `Failed` stops the consumer without committing it.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(
        &self,
        message: &ConsumedMessage,
        shutdown: &CancellationToken,
    ) -> Result<(), ProcessError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("giving up after {count} consecutive kafka errors, last: {last}")]
    TooManyErrors { count: u32, last: KafkaError },
    #[error("record {topic}:{partition}@{offset} could not be processed: {reason}")]
    Processing {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },
}

type Assignment = Arc<RwLock<HashSet<(String, i32)>>>;

/// Keeps track of the partitions currently owned by this group member.
pub struct AssignmentContext {
    name: String,
    assignment: Assignment,
}

impl ClientContext for AssignmentContext {}

impl ConsumerContext for AssignmentContext {
    fn pre_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        if let Rebalance::Revoke(partitions) = rebalance {
            let Ok(mut assignment) = self.assignment.write() else {
                return;
            };
            for element in partitions.elements() {
                assignment.remove(&(element.topic().to_owned(), element.partition()));
            }
            info!(consumer = %self.name, revoked = partitions.count(), "partitions revoked");
        }
    }

    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                let Ok(mut assignment) = self.assignment.write() else {
                    return;
                };
                for element in partitions.elements() {
                    assignment.insert((element.topic().to_owned(), element.partition()));
                }
                info!(consumer = %self.name, assigned = partitions.count(), "partitions assigned");
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(error) => {
                warn!(consumer = %self.name, "rebalance error: {}", error);
            }
        }
    }
}

/// Joins a consumer group on a list of topics and feeds every record, in
/// partition order, to a `MessageProcessor`. Offsets are committed one record
/// at a time, only after the processor succeeded.
pub struct TopicConsumer {
    name: String,
    topics: Vec<String>,
    consumer: StreamConsumer<AssignmentContext>,
    assignment: Assignment,
    liveness: HealthHandle,
    stop: CancellationToken,
}

impl TopicConsumer {
    pub fn new(
        name: &str,
        kafka: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        topics: Vec<String>,
        liveness: HealthHandle,
        stop: CancellationToken,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &kafka.kafka_hosts)
            .set("group.id", consumer_config.group_id(name))
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set(
                "session.timeout.ms",
                consumer_config.kafka_consumer_session_timeout_ms.to_string(),
            )
            .set(
                "max.poll.interval.ms",
                consumer_config
                    .kafka_consumer_max_poll_interval_ms
                    .to_string(),
            )
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false");

        if kafka.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka consumer configuration: {:?}", client_config);

        let assignment = Assignment::default();
        let context = AssignmentContext {
            name: name.to_owned(),
            assignment: assignment.clone(),
        };
        let consumer: StreamConsumer<AssignmentContext> =
            client_config.create_with_context(context)?;

        Ok(Self {
            name: name.to_owned(),
            topics,
            consumer,
            assignment,
            liveness,
            stop,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Stops the consume loop. Calling it more than once has no further effect.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Runs until `stop` is called or a fatal error occurs.
    pub async fn start<P>(&self, processor: &P) -> Result<(), ConsumeError>
    where
        P: MessageProcessor + ?Sized,
    {
        // Fail fast when brokers are unreachable, rather than polling forever
        let metadata = self
            .consumer
            .fetch_metadata(None, Duration::from_secs(15))
            .map_err(|error| {
                error!(consumer = %self.name, "failed to fetch kafka metadata: {:?}", error);
                self.liveness.report_status(ComponentStatus::Unhealthy);
                error
            })?;
        debug!(
            consumer = %self.name,
            "connected to kafka, {} topics visible",
            metadata.topics().len()
        );

        let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)?;
        info!(consumer = %self.name, topics = ?self.topics, "consumer started");

        let result = self.consume(processor).await;

        self.consumer.unsubscribe();
        match &result {
            Ok(()) => {
                info!(consumer = %self.name, "consumer stopped");
                self.liveness.report_status(ComponentStatus::Stopped);
            }
            Err(error) => {
                error!(consumer = %self.name, "consumer failed: {}", error);
                self.liveness.report_status(ComponentStatus::Unhealthy);
            }
        }
        result
    }

    async fn consume<P>(&self, processor: &P) -> Result<(), ConsumeError>
    where
        P: MessageProcessor + ?Sized,
    {
        let mut liveness_interval = tokio::time::interval(LIVENESS_INTERVAL);
        let mut consecutive_errors = 0;

        loop {
            let message = tokio::select! {
                _ = self.stop.cancelled() => return Ok(()),
                _ = liveness_interval.tick() => {
                    self.liveness.report_healthy();
                    continue;
                }
                received = self.consumer.recv() => match received {
                    Ok(message) => {
                        consecutive_errors = 0;
                        ConsumedMessage::from_borrowed(&message)
                    }
                    Err(error) => {
                        consecutive_errors += 1;
                        metrics::counter!("kafka_consumer_errors_total", "consumer" => self.name.clone()).increment(1);
                        if consecutive_errors >= MAX_CONSECUTIVE_KAFKA_ERRORS {
                            return Err(ConsumeError::TooManyErrors { count: consecutive_errors, last: error });
                        }
                        warn!(consumer = %self.name, "failed to receive message: {}", error);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };

            let labels = [("topic", message.topic.clone())];
            metrics::counter!("kafka_messages_consumed_total", &labels).increment(1);
            self.liveness.report_healthy();

            let outcome = tokio::select! {
                _ = self.stop.cancelled() => Err(ProcessError::Cancelled),
                outcome = processor.process(&message, &self.stop) => outcome,
            };

            match outcome {
                Ok(()) => self.commit(&message),
                Err(ProcessError::Cancelled) => {
                    info!(
                        consumer = %self.name,
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        "shutdown while processing, record left uncommitted"
                    );
                    return Ok(());
                }
                Err(ProcessError::Failed(reason)) => {
                    metrics::counter!("kafka_messages_failed_total", &labels).increment(1);
                    return Err(ConsumeError::Processing {
                        topic: message.topic,
                        partition: message.partition,
                        offset: message.offset,
                        reason,
                    });
                }
            }
        }
    }

    fn is_assigned(&self, topic: &str, partition: i32) -> bool {
        self.assignment
            .read()
            .map(|assignment| assignment.contains(&(topic.to_owned(), partition)))
            .unwrap_or(false)
    }

    fn commit(&self, message: &ConsumedMessage) {
        if !self.is_assigned(&message.topic, message.partition) {
            warn!(
                consumer = %self.name,
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "partition revoked while processing, not committing"
            );
            return;
        }

        let mut offsets = TopicPartitionList::new();
        if let Err(error) = offsets.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        ) {
            warn!(consumer = %self.name, "invalid offset to commit: {}", error);
            return;
        }

        // A failed commit only means the record is delivered again
        match self.consumer.commit(&offsets, CommitMode::Sync) {
            Ok(()) => {
                metrics::counter!("kafka_messages_committed_total", "topic" => message.topic.clone())
                    .increment(1);
            }
            Err(error) => warn!(
                consumer = %self.name,
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "failed to commit offset: {}",
                error
            ),
        }
    }
}
