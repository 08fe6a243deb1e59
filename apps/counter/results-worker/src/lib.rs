//! Counting Results Worker
//!
//! Consumes counting results from a RabbitMQ queue and stores them in
//! PostgreSQL.
//!
//! ## Architecture
//!
//! ```text
//! RabbitMQ queue (auto-ack)
//!   ↓
//! QueueWorker<CountingResult, CountingResultDecoder, CountingResultProcessor>
//!   ↓ (decode, report dependency, save)
//! PgResultStore
//!   ↓
//! PostgreSQL (counting_results)
//! ```
//!
//! A liveness loop logs a heartbeat on a fixed interval next to the pipeline.
//! Both stop on SIGINT/SIGTERM.

pub mod config;
pub mod probes;

use crate::config::Config;
use crate::probes::PostgresProbe;
use axum::Router;
use core_config::Environment;
use database::postgres::{DatabaseConnection, connect_from_config_with_retry, run_migrations};
use domain_counting::{CountingResult, CountingResultDecoder, CountingResultProcessor, PgResultStore};
use eyre::{Result, WrapErr};
use migration::Migrator;
use queue_worker::{
    AmqpConsumer, AmqpProbe, ChannelTelemetryReporter, HealthState, HeartbeatMonitor,
    LivenessLoop, MetricsTelemetrySink, QueueWorker, health_router, metrics,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

const APP_NAME: &str = env!("CARGO_PKG_NAME");
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the worker until SIGINT/SIGTERM or until the broker subscription ends
///
/// # Errors
///
/// Returns an error if:
/// - configuration is missing or invalid
/// - PostgreSQL is unreachable after retries or migrations fail
/// - the broker connection or subscription cannot be established
/// - the subscription closes while running
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    metrics::init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    info!(name = APP_NAME, version = APP_VERSION, "Starting counting results worker");
    info!("Environment: {:?}", environment);

    let config = Config::from_env().wrap_err("Failed to load configuration")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    run_with_shutdown(config, shutdown_rx).await
}

/// Run the worker with an externally driven shutdown flag
///
/// Startup order is Postgres, migrations, health listener, broker. Once
/// subscribed, the broker connection is closed on every exit path.
pub async fn run_with_shutdown(config: Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    info!("Connecting to PostgreSQL...");
    let db = connect_from_config_with_retry(config.postgres.clone(), None)
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;
    info!("Connected to PostgreSQL successfully");

    if config.run_migrations {
        run_migrations::<Migrator>(&db, APP_NAME)
            .await
            .wrap_err("Failed to run database migrations")?;
    }

    let listener = TcpListener::bind(config.server.address())
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", config.server.address()))?;

    info!(broker = %config.amqp.redacted_url(), "Connecting to RabbitMQ...");
    let mut consumer = AmqpConsumer::connect(&config.amqp_settings())
        .await
        .wrap_err("Failed to subscribe to RabbitMQ")?;

    let result = consume(&config, db, listener, &mut consumer, shutdown).await;

    consumer.close().await;

    match result {
        Ok(()) => {
            info!("Counting results worker stopped");
            Ok(())
        }
        Err(e) if e.is_disconnect() => {
            error!(error = %e, "Lost the broker subscription, exiting for restart");
            Err(eyre::eyre!("{}", e))
        }
        Err(e) => {
            error!(error = %e, "Counting results worker stopped after a pipeline failure");
            Err(eyre::eyre!("{}", e))
        }
    }
}

/// Everything that runs while subscribed: health server, liveness loop,
/// telemetry exporter and the pipeline itself
async fn consume(
    config: &Config,
    db: DatabaseConnection,
    listener: TcpListener,
    consumer: &mut AmqpConsumer,
    shutdown: watch::Receiver<bool>,
) -> Result<(), queue_worker::QueueError> {
    let worker_config = config.worker_config();
    let monitor = HeartbeatMonitor::new();

    // Stops the health server once the pipeline has returned
    let (stop_tx, stop_rx) = watch::channel(false);

    let health_state = HealthState::new(APP_NAME, APP_VERSION, &worker_config.queue_name, monitor.clone())
        .with_probe(Arc::new(AmqpProbe::new(consumer.connection_status())))
        .with_probe(Arc::new(PostgresProbe::new(db.clone())));
    let health_server = tokio::spawn(serve_health(listener, health_router(health_state), stop_rx));

    let liveness = LivenessLoop::new(worker_config.heartbeat_interval, monitor);

    let (reporter, exporter) =
        ChannelTelemetryReporter::spawn(MetricsTelemetrySink, worker_config.telemetry_buffer_size);

    let worker = QueueWorker::<CountingResult, _, _>::new(
        CountingResultDecoder,
        CountingResultProcessor::new(PgResultStore::new(db)),
        Arc::new(reporter),
        worker_config,
    );

    // Heartbeats stop as soon as shutdown is requested, not after the drain
    let (result, liveness_state) = worker.run_with_liveness(consumer, liveness, shutdown).await;
    info!(state = ?liveness_state, "Liveness loop finished");

    // Dropping the last reporter closes the buffer so the exporter drains and exits
    drop(worker);
    if let Err(e) = exporter.await {
        warn!(error = %e, "Telemetry exporter task failed");
    }

    let _ = stop_tx.send(true);
    if let Err(e) = health_server.await {
        warn!(error = %e, "Health server task failed");
    }

    result
}

/// Serve health and metrics endpoints until `stop` is set
async fn serve_health(listener: TcpListener, app: Router, mut stop: watch::Receiver<bool>) {
    match listener.local_addr() {
        Ok(addr) => info!(address = %addr, "Health server listening"),
        Err(e) => warn!(error = %e, "Health server address unavailable"),
    }

    let shutdown = async move {
        while !*stop.borrow_and_update() {
            if stop.changed().await.is_err() {
                break;
            }
        }
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        error!(error = %e, "Health server failed");
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?;

        tokio::select! {
            res = signal::ctrl_c() => {
                res.wrap_err("Failed to install Ctrl+C handler")?;
                info!("Received Ctrl+C, initiating shutdown...");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to install Ctrl+C handler")?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
