//! Configuration for the counting results worker

use core_config::amqp::AmqpConfig;
use core_config::server::ServerConfig;
use core_config::{ConfigError, Environment, FromEnv, env_parse};
use database::postgres::PostgresConfig;
use queue_worker::{AmqpSettings, QueueWorkerConfig};
use std::time::Duration;

/// Worker configuration, loaded once at startup
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub amqp: AmqpConfig,
    pub postgres: PostgresConfig,
    pub server: ServerConfig,
    pub heartbeat_interval: Duration,
    pub max_concurrent_deliveries: usize,
    pub telemetry_buffer_size: usize,
    pub run_migrations: bool,
}

impl Config {
    /// Environment variables on top of the AMQP, Postgres and server ones:
    /// - `WORKER_HEARTBEAT_INTERVAL_MS` (default: 5000, must be > 0)
    /// - `WORKER_MAX_CONCURRENT_DELIVERIES` (default: 16, must be > 0)
    /// - `WORKER_TELEMETRY_BUFFER` (default: 1024, must be > 0)
    /// - `RUN_MIGRATIONS` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_env();
        let amqp = AmqpConfig::from_env()?;
        let postgres = PostgresConfig::from_env()?;
        let server = ServerConfig::from_env()?;

        let heartbeat_ms: u64 = positive("WORKER_HEARTBEAT_INTERVAL_MS", "5000")?;
        let max_concurrent_deliveries = positive("WORKER_MAX_CONCURRENT_DELIVERIES", "16")?;
        let telemetry_buffer_size = positive("WORKER_TELEMETRY_BUFFER", "1024")?;
        let run_migrations = env_parse("RUN_MIGRATIONS", "true")?;

        Ok(Self {
            environment,
            amqp,
            postgres,
            server,
            heartbeat_interval: Duration::from_millis(heartbeat_ms),
            max_concurrent_deliveries,
            telemetry_buffer_size,
            run_migrations,
        })
    }

    pub fn amqp_settings(&self) -> AmqpSettings {
        AmqpSettings::new(&self.amqp.url, &self.amqp.queue, &self.amqp.consumer_tag)
    }

    pub fn worker_config(&self) -> QueueWorkerConfig {
        QueueWorkerConfig::new(&self.amqp.queue)
            .with_max_concurrent_deliveries(self.max_concurrent_deliveries)
            .with_telemetry_buffer_size(self.telemetry_buffer_size)
            .with_heartbeat_interval(self.heartbeat_interval)
    }
}

fn positive<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Default + PartialOrd,
    T::Err: std::fmt::Display,
{
    let value: T = env_parse(key, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            details: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
