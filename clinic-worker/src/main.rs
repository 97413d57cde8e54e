//! Consume the clinic change streams and apply their side effects.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clinic_common::clients::{build_http_client, EhrGatewayClient, KafkaMailer};
use common_kafka::kafka_producer::create_kafka_producer;
use envconfig::Envconfig;
use health::HealthRegistry;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use clinic_worker::config::Config;
use clinic_worker::context::{AppContext, USER_AGENT};
use clinic_worker::ehr::OrderProcessor;
use clinic_worker::registry::TopicRegistry;
use clinic_worker::supervisor::Supervisor;

fn setup_tracing() {
    let log_layer: tracing_subscriber::filter::Filtered<
        tracing_subscriber::fmt::Layer<tracing_subscriber::Registry>,
        EnvFilter,
        tracing_subscriber::Registry,
    > = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("starting clinic worker");

    let config = Config::init_from_env().context("invalid configuration")?;

    let health = HealthRegistry::new("liveness");
    let producer = create_kafka_producer(
        &config.kafka,
        health.register("kafka-producer", Duration::from_secs(30)),
    )
    .await
    .context("failed to create kafka producer")?;
    let mailer = Arc::new(KafkaMailer::new(
        producer.clone(),
        config.kafka.topic(&config.mailer_topic),
    ));
    let context = Arc::new(AppContext::new(&config, mailer)?);

    let orders = match config.ehr.gateway()? {
        Some(gateway) => {
            let http = build_http_client(config.request_timeout.0, USER_AGENT)?;
            let gateway = EhrGatewayClient::new(http, &gateway)?;
            Some(Arc::new(OrderProcessor::new(
                context.clone(),
                Arc::new(gateway),
            )))
        }
        None => {
            info!("ehr integration disabled, orders are not consumed");
            None
        }
    };
    let registry = TopicRegistry::build(&config, context, orders)?;

    Supervisor::new(config, registry, producer, health)
        .run()
        .await?;

    Ok(())
}
