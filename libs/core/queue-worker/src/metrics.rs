//! Prometheus metrics for queue workers

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

use crate::worker::DeliveryOutcome;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), BuildError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok::<_, BuildError>(handle)
    })?;
    Ok(())
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Queue worker metrics helper
#[derive(Clone, Debug)]
pub struct QueueMetrics {
    queue: String,
}

impl QueueMetrics {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    pub fn delivery_received(&self) {
        counter!(
            "queue_worker_deliveries_received_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    pub fn delivery_handled(&self, outcome: DeliveryOutcome, duration: Duration) {
        counter!(
            "queue_worker_deliveries_handled_total",
            "queue" => self.queue.clone(),
            "outcome" => outcome.as_str()
        )
        .increment(1);

        histogram!(
            "queue_worker_delivery_duration_seconds",
            "queue" => self.queue.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn in_flight(&self, count: usize) {
        gauge!(
            "queue_worker_in_flight_deliveries",
            "queue" => self.queue.clone()
        )
        .set(count as f64);
    }
}

/// Record one exported dependency call
pub fn record_dependency(name: &str, target: &str, success: bool, duration: Duration) {
    counter!(
        "queue_worker_dependency_calls_total",
        "dependency" => name.to_string(),
        "target" => target.to_string(),
        "success" => if success { "true" } else { "false" }
    )
    .increment(1);

    histogram!(
        "queue_worker_dependency_duration_seconds",
        "dependency" => name.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_heartbeat() {
    counter!("queue_worker_heartbeats_total").increment(1);
}

/// Telemetry records dropped because the buffer was full
pub fn record_telemetry_dropped() {
    counter!("queue_worker_telemetry_dropped_total").increment(1);
}
