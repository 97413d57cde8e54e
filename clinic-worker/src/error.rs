use clinic_common::cdc::DecodeError;
use clinic_common::clients::ClientError;
use common_kafka::kafka_consumer::ConsumeError;
use common_kafka::kafka_producer::KafkaProduceError;
use metrics_exporter_prometheus::BuildError;
use rdkafka::error::KafkaError;
use thiserror::Error;

/// Enumeration of the ways a handler can fail on a record. Whether the record
/// is tried again is decided by `is_retriable`.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("invalid record: {0}")]
    Invalid(String),
    #[error("failed to decode record: {0}")]
    Decode(#[from] DecodeError),
    #[error("{context}: {source}")]
    Client {
        context: String,
        #[source]
        source: ClientError,
    },
    #[error("failed to enqueue email: {0}")]
    Mailer(#[from] KafkaProduceError),
    #[error("{0} timed out")]
    Timeout(String),
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Bad records stay bad however many times they are handled.
    pub fn is_retriable(&self) -> bool {
        match self {
            HandlerError::Invalid(_) | HandlerError::Decode(_) => false,
            HandlerError::Client { source, .. } => source.is_retriable(),
            HandlerError::Mailer(KafkaProduceError::SerializationError { .. }) => false,
            HandlerError::Mailer(_) | HandlerError::Timeout(_) | HandlerError::Failed(_) => true,
        }
    }
}

/// Attaches what the worker was doing to a client error.
pub trait ClientResultExt<T> {
    fn context(self, context: &str) -> Result<T, HandlerError>;

    fn with_context<F>(self, context: F) -> Result<T, HandlerError>
    where
        F: FnOnce() -> String;
}

impl<T> ClientResultExt<T> for Result<T, ClientError> {
    fn context(self, context: &str) -> Result<T, HandlerError> {
        self.with_context(|| context.to_owned())
    }

    fn with_context<F>(self, context: F) -> Result<T, HandlerError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| HandlerError::Client {
            context: context(),
            source,
        })
    }
}

/// Enumeration of errors that stop the worker, at startup or while running.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to create client: {0}")]
    Client(#[from] ClientError),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("failed to install the metrics recorder: {0}")]
    Metrics(#[from] BuildError),
    #[error("{0} is registered twice")]
    DuplicateRegistration(String),
    #[error("consumer {name} failed: {source}")]
    Consumer {
        name: String,
        #[source]
        source: ConsumeError,
    },
    #[error("http server failed: {0}")]
    Server(#[from] std::io::Error),
    #[error("failed to install the shutdown signal handler: {0}")]
    Signal(#[source] std::io::Error),
    #[error("task failed to complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{Method, StatusCode};

    fn status_error(status: StatusCode) -> ClientError {
        ClientError::UnexpectedStatus {
            method: Method::GET,
            url: "http://clinic/v1/clinics/c1".to_string(),
            status,
            body: String::new(),
        }
    }

    #[test]
    fn downstream_failures_are_retriable() {
        let error: Result<(), _> = Err(status_error(StatusCode::BAD_GATEWAY));
        let error = error.context("fetching clinic").unwrap_err();

        assert!(error.is_retriable());
        assert!(error.to_string().starts_with("fetching clinic: "));
        assert!(HandlerError::Timeout("migration".to_string()).is_retriable());
    }

    #[test]
    fn bad_records_and_configuration_are_not_retriable() {
        assert!(!HandlerError::Invalid("missing userId".to_string()).is_retriable());
        assert!(!HandlerError::Decode(DecodeError::EmptyPayload).is_retriable());

        let error: Result<(), _> = Err(ClientError::InvalidUrl {
            url: "clinic".to_string(),
            reason: "relative URL without a base".to_string(),
        });
        assert!(!error.context("building client").unwrap_err().is_retriable());
    }
}
