use std::collections::BTreeMap;

use async_trait::async_trait;
use common_kafka::kafka_producer::{send_json_to_kafka, KafkaContext, KafkaProduceError};
use rdkafka::producer::FutureProducer;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const TEMPLATE_CLINIC_CREATED: &str = "clinic_created";
pub const TEMPLATE_CLINICIAN_PERMISSIONS_UPDATED: &str = "clinician_permissions_updated";
pub const TEMPLATE_PATIENT_CLINIC_MERGED: &str = "clinic_merged_patient_notification";
pub const TEMPLATE_CLINICIAN_CLINIC_MERGED: &str = "clinic_merged_notification";
pub const TEMPLATE_TARGET_ADMIN_CLINIC_MERGED: &str = "clinic_merged_target_admin_notification";

/// A transactional email, rendered and delivered by the mailer service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplateEvent {
    pub recipient: String,
    pub template: String,
    pub variables: BTreeMap<String, String>,
}

impl EmailTemplateEvent {
    pub fn new(recipient: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            template: template.into(),
            variables: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, name: &str, value: impl Into<String>) -> Self {
        self.variables.insert(name.to_owned(), value.into());
        self
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Returns once the event is durably enqueued.
    async fn send(&self, event: EmailTemplateEvent) -> Result<(), KafkaProduceError>;
}

pub struct KafkaMailer {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaMailer {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl Mailer for KafkaMailer {
    async fn send(&self, event: EmailTemplateEvent) -> Result<(), KafkaProduceError> {
        send_json_to_kafka(&self.producer, &self.topic, Some(&event.recipient), &event).await?;
        info!(template = %event.template, topic = %self.topic, "email enqueued");
        Ok(())
    }
}
