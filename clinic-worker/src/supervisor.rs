//! Runs the consumers of every registered stream and the HTTP probes.
//!
//! Consumers share a root cancellation token. The first consumer to stop,
//! whatever the reason, cancels it, and so does SIGINT or SIGTERM. The worker
//! then waits for every consumer to leave its loop and exits with the first
//! error seen, so a record that could not be processed is consumed again by
//! the next process.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::{routing::get, Router};
use clinic_common::metrics::{serve, setup_metrics_routes};
use common_kafka::kafka_consumer::TopicConsumer;
use common_kafka::kafka_producer::{flush_producer, KafkaContext};
use health::HealthRegistry;
use rdkafka::producer::FutureProducer;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::consumer::cascading::KafkaRepublisher;
use crate::error::WorkerError;
use crate::registry::TopicRegistry;

/// Consumers report every 10 seconds while idle.
const LIVENESS_DEADLINE: Duration = Duration::from_secs(30);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn index() -> &'static str {
    "clinic worker"
}

async fn readiness(ready: Arc<AtomicBool>) -> (StatusCode, &'static str) {
    if ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    }
}

/// Probes of the worker: `/status` and `/_liveness` report the health of the
/// consumers, `/_readiness` fails once shutdown started.
pub fn probe_routes(health: HealthRegistry, ready: Arc<AtomicBool>) -> Router {
    let status = health.clone();
    Router::new()
        .route("/", get(index))
        .route("/status", get(move || std::future::ready(status.get_status())))
        .route("/_liveness", get(move || std::future::ready(health.get_status())))
        .route("/_readiness", get(move || readiness(ready.clone())))
}

/// Resolves on SIGINT or SIGTERM.
fn shutdown_signal() -> Result<impl Future<Output = ()>, WorkerError> {
    let mut sigterm = signal(SignalKind::terminate()).map_err(WorkerError::Signal)?;

    Ok(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    })
}

/// Waits for every task of `tasks` to end. The first task to end, a shutdown
/// signal, or the cancellation of `root` from elsewhere stops the others.
pub async fn supervise<S>(
    mut tasks: JoinSet<Result<(), WorkerError>>,
    shutdown: S,
    root: &CancellationToken,
    ready: &AtomicBool,
) -> Result<(), WorkerError>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut first_error = None;
    let mut stopping = false;

    let stop = |stopping: &mut bool| {
        if !*stopping {
            *stopping = true;
            ready.store(false, Ordering::SeqCst);
            root.cancel();
        }
    };

    loop {
        tokio::select! {
            _ = &mut shutdown, if !stopping => {
                info!("shutting down, waiting for consumers to stop");
                stop(&mut stopping);
            }
            _ = root.cancelled(), if !stopping => stop(&mut stopping),
            joined = tasks.join_next() => {
                let Some(joined) = joined else {
                    break;
                };
                match joined.map_err(WorkerError::from).and_then(|result| result) {
                    Ok(()) if !stopping => warn!("a consumer stopped, shutting down"),
                    Ok(()) => {}
                    Err(error) => {
                        error!("{}, shutting down", error);
                        first_error.get_or_insert(error);
                    }
                }
                stop(&mut stopping);
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}

pub struct Supervisor {
    config: Config,
    registry: TopicRegistry,
    producer: FutureProducer<KafkaContext>,
    health: HealthRegistry,
}

impl Supervisor {
    pub fn new(
        config: Config,
        registry: TopicRegistry,
        producer: FutureProducer<KafkaContext>,
        health: HealthRegistry,
    ) -> Self {
        Self {
            config,
            registry,
            producer,
            health,
        }
    }

    /// Runs until shutdown is requested or a consumer fails.
    pub async fn run(self) -> Result<(), WorkerError> {
        let root = CancellationToken::new();
        let ready = Arc::new(AtomicBool::new(true));

        let router = setup_metrics_routes(probe_routes(self.health.clone(), ready.clone()))?;
        let bind = self.config.bind();
        let server_stop = CancellationToken::new();
        let server = {
            let root = root.clone();
            let server_stop = server_stop.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = server_stop.cancelled() => Ok(()),
                    result = serve(router, &bind) => {
                        root.cancel();
                        result
                    }
                }
            })
        };

        let republisher = Arc::new(KafkaRepublisher::new(self.producer.clone()));
        let mut tasks = JoinSet::new();
        for binding in self.registry.bindings(republisher) {
            let liveness = self
                .health
                .register(format!("consumer-{}", binding.name), LIVENESS_DEADLINE);
            let consumer = TopicConsumer::new(
                &binding.name,
                &self.config.kafka,
                &self.config.consumer,
                vec![binding.topic],
                liveness,
                root.child_token(),
            )?;
            let processor = binding.processor;

            tasks.spawn(async move {
                consumer
                    .start(processor.as_ref())
                    .await
                    .map_err(|source| WorkerError::Consumer {
                        name: consumer.name().to_owned(),
                        source,
                    })
            });
        }
        info!(consumers = tasks.len(), "worker started");

        let result = supervise(tasks, shutdown_signal()?, &root, &ready).await;

        flush_producer(&self.producer, FLUSH_TIMEOUT);
        server_stop.cancel();
        let served = server.await?;
        info!("worker stopped");

        result.and(served.map_err(WorkerError::from))
    }
}
