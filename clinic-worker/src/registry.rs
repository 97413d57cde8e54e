//! The topics the worker consumes, and how failures on each are retried.
//!
//! Change streams whose effects must apply in order use a retrying consumer,
//! which blocks the partition until the record goes through. EHR orders are
//! independent of each other and go through a pipeline of delay stages, so a
//! failing order never holds back the others.

use std::sync::Arc;

use clinic_common::retry::{DelayStages, RetryPolicy};
use common_kafka::kafka_consumer::MessageProcessor;

use crate::config::Config;
use crate::consumer::cascading::{CascadingConsumer, Republisher};
use crate::consumer::retrying::RetryingConsumer;
use crate::consumer::{CdcHandler, RecordHandler};
use crate::context::AppContext;
use crate::ehr::{EhrOrdersHandler, OrderProcessor};
use crate::error::WorkerError;
use crate::handlers::{
    CliniciansHandler, ClinicsHandler, DataSourcesHandler, MergePlansHandler, MigrationsHandler,
    PatientsHandler, SummariesHandler, UserEventsHandler,
};
use crate::migration::{MigrationDriver, MigrationLimits};
use crate::scheduled::ScheduledReportsHandler;

pub const PATIENTS_TOPIC: &str = "clinic.patients";
pub const CLINICIANS_TOPIC: &str = "clinic.clinicians";
pub const CLINICS_TOPIC: &str = "clinic.clinics";
pub const SUMMARIES_TOPIC: &str = "data.summary";
pub const DATA_SOURCES_TOPIC: &str = "tidepool.data_sources";
pub const MIGRATIONS_TOPIC: &str = "clinic.migrations";
pub const MERGE_PLANS_TOPIC: &str = "clinic.merge_plans";
pub const USER_EVENTS_TOPIC: &str = "user-events";
pub const EHR_ORDERS_TOPIC: &str = "clinic.redox";
pub const SCHEDULED_REPORTS_TOPIC: &str = "clinic.scheduledSummaryAndReportsOrders";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryMode {
    Retrying(RetryPolicy),
    Cascading(DelayStages),
}

pub struct Registration {
    pub name: String,
    pub topic: String,
    pub handler: Arc<dyn RecordHandler>,
    pub mode: RetryMode,
}

impl Registration {
    pub fn new(topic: String, handler: Arc<dyn RecordHandler>, mode: RetryMode) -> Self {
        Self {
            name: handler.name().to_owned(),
            topic,
            handler,
            mode,
        }
    }
}

/// A consumer to run: its name is also the suffix of its consumer group.
pub struct ConsumerBinding {
    pub name: String,
    pub topic: String,
    pub processor: Arc<dyn MessageProcessor>,
}

#[derive(Default)]
pub struct TopicRegistry {
    registrations: Vec<Registration>,
}

impl TopicRegistry {
    /// Every stream of the worker. The EHR streams are only consumed when an
    /// order processor is given.
    pub fn build(
        config: &Config,
        context: Arc<AppContext>,
        orders: Option<Arc<OrderProcessor>>,
    ) -> Result<Self, WorkerError> {
        let kafka = &config.kafka;
        let retrying = RetryMode::Retrying(config.retry_policy()?);
        let retrying_on = |handler: Arc<dyn RecordHandler>, topic: &str| {
            Registration::new(kafka.topic(topic), handler, retrying.clone())
        };

        let mut registry = Self::default();
        registry.register(retrying_on(
            Arc::new(CdcHandler::new(PatientsHandler::new(context.clone()))),
            PATIENTS_TOPIC,
        ))?;
        registry.register(retrying_on(
            Arc::new(CdcHandler::new(CliniciansHandler::new(context.clone()))),
            CLINICIANS_TOPIC,
        ))?;
        registry.register(retrying_on(
            Arc::new(CdcHandler::new(ClinicsHandler::new(context.clone()))),
            CLINICS_TOPIC,
        ))?;
        registry.register(retrying_on(
            Arc::new(CdcHandler::new(SummariesHandler::new(context.clone()))),
            SUMMARIES_TOPIC,
        ))?;
        registry.register(retrying_on(
            Arc::new(CdcHandler::new(DataSourcesHandler::new(context.clone()))),
            DATA_SOURCES_TOPIC,
        ))?;
        registry.register(retrying_on(
            Arc::new(CdcHandler::new(MigrationsHandler::new(MigrationDriver::new(
                context.clone(),
                MigrationLimits::from_config(config),
            )))),
            MIGRATIONS_TOPIC,
        ))?;
        registry.register(retrying_on(
            Arc::new(CdcHandler::new(MergePlansHandler::new(context.clone()))),
            MERGE_PLANS_TOPIC,
        ))?;
        registry.register(retrying_on(
            Arc::new(UserEventsHandler::new(context)),
            USER_EVENTS_TOPIC,
        ))?;

        if let Some(orders) = orders {
            registry.register(Registration::new(
                kafka.topic(EHR_ORDERS_TOPIC),
                Arc::new(EhrOrdersHandler::new(orders.clone())),
                RetryMode::Cascading(DelayStages::new(config.ehr_retry_delays.0.iter().copied())),
            ))?;
            registry.register(retrying_on(
                Arc::new(ScheduledReportsHandler::new(orders)),
                SCHEDULED_REPORTS_TOPIC,
            ))?;
        }

        Ok(registry)
    }

    /// Names and topics must be unique, a topic is consumed by one handler.
    pub fn register(&mut self, registration: Registration) -> Result<(), WorkerError> {
        if self
            .registrations
            .iter()
            .any(|existing| existing.name == registration.name)
        {
            return Err(WorkerError::DuplicateRegistration(format!(
                "handler {}",
                registration.name
            )));
        }
        if self
            .registrations
            .iter()
            .any(|existing| existing.topic == registration.topic)
        {
            return Err(WorkerError::DuplicateRegistration(format!(
                "topic {}",
                registration.topic
            )));
        }

        self.registrations.push(registration);
        Ok(())
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// One consumer per retrying registration, and one per delay stage of a
    /// cascading registration.
    pub fn bindings(&self, republisher: Arc<dyn Republisher>) -> Vec<ConsumerBinding> {
        let mut bindings = Vec::new();

        for registration in &self.registrations {
            match &registration.mode {
                RetryMode::Retrying(policy) => bindings.push(ConsumerBinding {
                    name: registration.name.clone(),
                    topic: registration.topic.clone(),
                    processor: Arc::new(RetryingConsumer::new(
                        registration.handler.clone(),
                        *policy,
                    )),
                }),
                RetryMode::Cascading(stages) => {
                    bindings.extend((0..stages.len()).map(|stage| ConsumerBinding {
                        name: stage_name(&registration.name, stage),
                        topic: DelayStages::topic(&registration.topic, stage),
                        processor: Arc::new(CascadingConsumer::new(
                            registration.handler.clone(),
                            republisher.clone(),
                            stages.clone(),
                            stage,
                            &registration.topic,
                        )),
                    }))
                }
            }
        }

        bindings
    }

    /// Topics the worker reads from, delay stages included.
    pub fn topics(&self) -> Vec<String> {
        self.registrations
            .iter()
            .flat_map(|registration| match &registration.mode {
                RetryMode::Retrying(_) => vec![registration.topic.clone()],
                RetryMode::Cascading(stages) => (0..stages.len())
                    .map(|stage| DelayStages::topic(&registration.topic, stage))
                    .collect(),
            })
            .collect()
    }
}

fn stage_name(name: &str, stage: usize) -> String {
    if stage == 0 {
        name.to_owned()
    } else {
        format!("{name}-retry-{stage}")
    }
}
