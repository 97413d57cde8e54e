use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // Prepended to every topic name, e.g. "default-" in shared clusters
    #[envconfig(default = "")]
    pub kafka_topic_prefix: String,

    #[envconfig(default = "0")]
    pub kafka_producer_linger_ms: u32, // Mailer events are low volume and acked synchronously

    #[envconfig(default = "64")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
}

impl KafkaConfig {
    /// Full topic name for a logical topic, with the deployment prefix applied.
    pub fn topic(&self, name: &str) -> String {
        format!("{}{}", self.kafka_topic_prefix, name)
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    // Every registered stream joins "{group}-{stream}" so offsets are tracked per stream
    #[envconfig(default = "clinic-worker")]
    pub kafka_consumer_group: String,

    // Newly created groups start from the oldest retained change event
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    #[envconfig(default = "45000")]
    pub kafka_consumer_session_timeout_ms: u32,

    // Retrying consumers block a partition for hours while a downstream
    // service recovers, so the poll interval is raised to the librdkafka maximum.
    #[envconfig(default = "86400000")]
    pub kafka_consumer_max_poll_interval_ms: u32,
}

impl ConsumerConfig {
    pub fn group_id(&self, stream: &str) -> String {
        format!("{}-{}", self.kafka_consumer_group, stream)
    }
}
