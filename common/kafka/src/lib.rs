pub mod config;
pub mod kafka_consumer;
pub mod kafka_producer;

/// Header carrying the index of the delay stage a record was republished to.
pub const RETRY_STAGE_HEADER: &str = "x-retry-stage";
/// Header carrying the topic a record was first consumed from.
pub const ORIGINAL_TOPIC_HEADER: &str = "x-original-topic";
