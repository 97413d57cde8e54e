use std::str::FromStr;
use std::time;

use clinic_common::clients::EhrGatewayConfig;
use clinic_common::retry::RetryPolicy;
use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;

use crate::error::WorkerError;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(default = "30000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(default = "60000")]
    pub retry_interval: EnvMsDuration,

    // Including the first attempt, a day of retries with the default interval.
    // Retries never outlast the consumer poll interval, see `retry_policy`.
    #[envconfig(default = "1440")]
    pub retry_attempts: u32,

    #[envconfig(default = "60,300,900,3600")]
    pub ehr_retry_delays: EnvSecondsList,

    #[envconfig(default = "4")]
    pub migration_threadiness: usize,

    #[envconfig(default = "15")]
    pub migration_rate_per_second: u32,

    #[envconfig(default = "10000")]
    pub migration_patient_timeout: EnvMsDuration,

    #[envconfig(default = "http://clinic:8080")]
    pub clinic_service_url: String,

    #[envconfig(default = "http://shoreline:9107")]
    pub auth_service_url: String,

    #[envconfig(default = "http://seagull:9120")]
    pub metadata_service_url: String,

    #[envconfig(default = "http://data:9220")]
    pub data_service_url: String,

    #[envconfig(default = "http://gatekeeper:9123")]
    pub sharing_service_url: String,

    #[envconfig(default = "http://export:9300")]
    pub export_service_url: String,

    #[envconfig(default = "http://marketo-service:8080")]
    pub marketing_service_url: String,

    #[envconfig(default = "http://hydrophone:9157")]
    pub confirmation_service_url: String,

    #[envconfig(default = "clinic-worker")]
    pub server_name: String,

    pub server_secret: NonEmptyString,

    #[envconfig(default = "false")]
    pub marketing_enabled: bool,

    #[envconfig(default = "emails")]
    pub mailer_topic: String,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    #[envconfig(nested = true)]
    pub ehr: EhrConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Policy of the retrying consumers. A record is not polled again while it
    /// is retried, so retries stop early enough for the last attempt to end
    /// within the poll interval, or the broker would evict the consumer.
    pub fn retry_policy(&self) -> Result<RetryPolicy, WorkerError> {
        let poll_interval =
            time::Duration::from_millis(self.consumer.kafka_consumer_max_poll_interval_ms.into());
        let budget = poll_interval.saturating_sub(self.request_timeout.0 * LAST_ATTEMPT_REQUESTS);
        if budget < self.retry_interval.0 {
            return Err(WorkerError::Config(format!(
                "KAFKA_CONSUMER_MAX_POLL_INTERVAL_MS of {}ms leaves no room for a retry",
                self.consumer.kafka_consumer_max_poll_interval_ms
            )));
        }

        Ok(RetryPolicy::new(self.retry_interval.0, self.retry_attempts).with_max_elapsed(budget))
    }
}

// Upper bound of the requests of one handler attempt, each bounded by the request timeout
const LAST_ATTEMPT_REQUESTS: u32 = 20;

#[derive(Envconfig, Clone)]
pub struct EhrConfig {
    #[envconfig(default = "false")]
    pub ehr_enabled: bool,

    #[envconfig(default = "https://api.redoxengine.com")]
    pub ehr_gateway_url: String,

    #[envconfig(default = "")]
    pub ehr_client_id: String,

    #[envconfig(default = "")]
    pub ehr_key_id: String,

    // RSA private key in PEM format, used to sign the token requests
    #[envconfig(default = "")]
    pub ehr_private_key: String,

    #[envconfig(default = "")]
    pub ehr_source_id: String,

    #[envconfig(default = "Tidepool")]
    pub ehr_source_name: String,

    #[envconfig(default = "false")]
    pub ehr_test_mode: bool,

    #[envconfig(default = "false")]
    pub ehr_upload_file_enabled: bool,
}

impl EhrConfig {
    /// Gateway settings when the EHR integration is enabled. Credentials are
    /// only required in that case.
    pub fn gateway(&self) -> Result<Option<EhrGatewayConfig>, WorkerError> {
        if !self.ehr_enabled {
            return Ok(None);
        }

        let required = [
            ("EHR_CLIENT_ID", &self.ehr_client_id),
            ("EHR_KEY_ID", &self.ehr_key_id),
            ("EHR_PRIVATE_KEY", &self.ehr_private_key),
            ("EHR_SOURCE_ID", &self.ehr_source_id),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.is_empty()) {
            return Err(WorkerError::Config(format!(
                "{name} is required when EHR_ENABLED is set"
            )));
        }

        Ok(Some(EhrGatewayConfig {
            base_url: self.ehr_gateway_url.clone(),
            client_id: self.ehr_client_id.clone(),
            key_id: self.ehr_key_id.clone(),
            private_key_pem: self.ehr_private_key.clone(),
            source_id: self.ehr_source_id.clone(),
            source_name: self.ehr_source_name.clone(),
            test_mode: self.ehr_test_mode,
            upload_file_enabled: self.ehr_upload_file_enabled,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// Comma separated list of durations in seconds, e.g. `60,300,900`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSecondsList(pub Vec<time::Duration>);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvSecondsListError(pub String);

impl FromStr for EnvSecondsList {
    type Err = ParseEnvSecondsListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| {
                item.parse::<u64>()
                    .map(time::Duration::from_secs)
                    .map_err(|_| ParseEnvSecondsListError(item.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(EnvSecondsList)
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn defaults_only_need_the_server_secret() {
        let config = Config::init_from_hashmap(&env(&[("SERVER_SECRET", "s3cr3t")])).unwrap();

        assert_eq!(config.bind(), "0.0.0.0:8080");
        assert_eq!(config.request_timeout.0, time::Duration::from_secs(30));
        assert_eq!(config.retry_attempts, 1440);
        assert_eq!(
            config.ehr_retry_delays.0,
            [60, 300, 900, 3600].map(time::Duration::from_secs).to_vec()
        );
        assert_eq!(config.migration_threadiness, 4);
        assert_eq!(config.migration_rate_per_second, 15);
        assert!(!config.ehr.ehr_enabled);
        assert!(config.ehr.gateway().unwrap().is_none());
    }

    #[test]
    fn retries_end_within_the_poll_interval() {
        let config = Config::init_from_hashmap(&env(&[("SERVER_SECRET", "s3cr3t")])).unwrap();
        let poll_interval = time::Duration::from_millis(
            config.consumer.kafka_consumer_max_poll_interval_ms.into(),
        );

        let policy = config.retry_policy().unwrap();

        let budget = policy.max_elapsed().unwrap();
        assert!(budget + config.request_timeout.0 * LAST_ATTEMPT_REQUESTS <= poll_interval);
        assert!(policy.interval() * (policy.max_attempts() - 1) > budget);
        assert_eq!(policy.retry_after(2, budget), None);
    }

    #[test]
    fn poll_intervals_shorter_than_a_retry_are_rejected() {
        let config = Config::init_from_hashmap(&env(&[
            ("SERVER_SECRET", "s3cr3t"),
            ("KAFKA_CONSUMER_MAX_POLL_INTERVAL_MS", "300000"),
        ]))
        .unwrap();

        assert!(matches!(config.retry_policy(), Err(WorkerError::Config(_))));
    }

    #[test]
    fn missing_server_secret_is_rejected() {
        assert!(Config::init_from_hashmap(&env(&[])).is_err());
        assert!(Config::init_from_hashmap(&env(&[("SERVER_SECRET", "")])).is_err());
    }

    #[test]
    fn enabled_ehr_requires_credentials() {
        let config = Config::init_from_hashmap(&env(&[
            ("SERVER_SECRET", "s3cr3t"),
            ("EHR_ENABLED", "true"),
            ("EHR_CLIENT_ID", "client"),
        ]))
        .unwrap();

        let error = config.ehr.gateway().unwrap_err();
        assert!(error.to_string().contains("EHR_KEY_ID"));
    }

    #[test]
    fn seconds_lists_are_parsed() {
        assert_eq!(
            "5, 10,,20".parse::<EnvSecondsList>().unwrap().0,
            [5, 10, 20].map(time::Duration::from_secs).to_vec()
        );
        assert!("".parse::<EnvSecondsList>().unwrap().0.is_empty());
        assert_eq!(
            "5,ten".parse::<EnvSecondsList>(),
            Err(ParseEnvSecondsListError("ten".to_string()))
        );
    }
}
