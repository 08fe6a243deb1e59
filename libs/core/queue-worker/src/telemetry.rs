//! Dependency telemetry
//!
//! Every consume produces one [`DependencyRecord`]. Reporters must never block
//! the pipeline and never surface export failures to it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::TelemetryError;
use crate::metrics;

/// A single tracked dependency call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyRecord {
    /// Dependency name, e.g. `RabbitMQ`
    pub name: String,
    /// Operation target, e.g. `Consume results`
    pub target: String,
    /// Raw payload as context
    pub data: String,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
}

/// Fire-and-forget telemetry capability
pub trait TelemetryReporter: Send + Sync {
    fn report(&self, record: DependencyRecord);
}

/// Observability backend fed by [`ChannelTelemetryReporter`]
#[async_trait]
pub trait TelemetrySink: Send + Sync + 'static {
    async fn export(&self, record: &DependencyRecord) -> Result<(), TelemetryError>;
}

/// Reporter backed by a bounded channel and a background exporter task.
///
/// `report` uses `try_send`: when the buffer is full the record is dropped.
/// The exporter stops once every clone of the reporter is dropped, after
/// draining what is left in the buffer.
#[derive(Clone)]
pub struct ChannelTelemetryReporter {
    tx: mpsc::Sender<DependencyRecord>,
}

impl ChannelTelemetryReporter {
    pub fn spawn<S: TelemetrySink>(sink: S, buffer_size: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<DependencyRecord>(buffer_size.max(1));

        let exporter = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = sink.export(&record).await {
                    debug!(error = %e, target = %record.target, "Telemetry export failed");
                }
            }
            debug!("Telemetry exporter stopped");
        });

        (Self { tx }, exporter)
    }
}

impl TelemetryReporter for ChannelTelemetryReporter {
    fn report(&self, record: DependencyRecord) {
        if let Err(e) = self.tx.try_send(record) {
            metrics::record_telemetry_dropped();
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => TelemetryError::BufferFull,
                mpsc::error::TrySendError::Closed(_) => {
                    TelemetryError::SinkUnavailable("exporter stopped".to_string())
                }
            };
            debug!(error = %reason, "Dropping dependency record");
        }
    }
}

/// Default sink: Prometheus counters plus a debug event
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsTelemetrySink;

#[async_trait]
impl TelemetrySink for MetricsTelemetrySink {
    async fn export(&self, record: &DependencyRecord) -> Result<(), TelemetryError> {
        metrics::record_dependency(&record.name, &record.target, record.success, record.duration);
        debug!(
            dependency = %record.name,
            target = %record.target,
            start_time = %record.start_time,
            duration_ms = record.duration.as_secs_f64() * 1000.0,
            success = record.success,
            "Dependency call tracked"
        );
        Ok(())
    }
}

/// Keeps every record in memory. Useful for tests and local runs.
#[derive(Clone, Default)]
pub struct RecordingTelemetryReporter {
    records: Arc<Mutex<Vec<DependencyRecord>>>,
}

impl RecordingTelemetryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DependencyRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl TelemetryReporter for RecordingTelemetryReporter {
    fn report(&self, record: DependencyRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    fn record(target: &str) -> DependencyRecord {
        DependencyRecord {
            name: "RabbitMQ".to_string(),
            target: target.to_string(),
            data: "{}".to_string(),
            start_time: Utc::now(),
            duration: Duration::from_millis(1),
            success: true,
        }
    }

    struct CollectingSink {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TelemetrySink for CollectingSink {
        async fn export(&self, record: &DependencyRecord) -> Result<(), TelemetryError> {
            self.seen.lock().unwrap().push(record.target.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl TelemetrySink for FailingSink {
        async fn export(&self, _record: &DependencyRecord) -> Result<(), TelemetryError> {
            Err(TelemetryError::SinkUnavailable("backend down".to_string()))
        }
    }

    /// Each export waits for a permit, then counts itself
    struct GatedSink {
        release: Arc<Semaphore>,
        exported: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TelemetrySink for GatedSink {
        async fn export(&self, _record: &DependencyRecord) -> Result<(), TelemetryError> {
            self.release
                .acquire()
                .await
                .map_err(|e| TelemetryError::SinkUnavailable(e.to_string()))?
                .forget();
            self.exported.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_channel_reporter_exports_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (reporter, exporter) = ChannelTelemetryReporter::spawn(
            CollectingSink { seen: seen.clone() },
            8,
        );

        reporter.report(record("Consume a"));
        reporter.report(record("Consume b"));
        drop(reporter);
        exporter.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["Consume a", "Consume b"]);
    }

    #[tokio::test]
    async fn test_sink_errors_are_swallowed() {
        let (reporter, exporter) = ChannelTelemetryReporter::spawn(FailingSink, 4);

        reporter.report(record("Consume a"));
        reporter.report(record("Consume b"));
        drop(reporter);

        // Exporter survives failures and ends normally
        exporter.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_buffer_drops_without_blocking() {
        let release = Arc::new(Semaphore::new(0));
        let exported = Arc::new(AtomicUsize::new(0));
        let (reporter, exporter) = ChannelTelemetryReporter::spawn(
            GatedSink {
                release: release.clone(),
                exported: exported.clone(),
            },
            1,
        );

        // Let the exporter take the first record and stall on the gate
        reporter.report(record("Consume 0"));
        tokio::task::yield_now().await;

        let reporting = tokio::time::timeout(Duration::from_secs(1), async {
            for i in 1..10 {
                reporter.report(record(&format!("Consume {}", i)));
            }
        })
        .await;
        assert!(reporting.is_ok(), "report waited on a full buffer");

        drop(reporter);
        release.add_permits(10);
        exporter.await.unwrap();

        // One record in the exporter plus one in the buffer, the rest dropped
        let exported = exported.load(Ordering::SeqCst);
        assert!((1..=2).contains(&exported), "exported {} records", exported);
    }

    #[test]
    fn test_recording_reporter() {
        let reporter = RecordingTelemetryReporter::new();
        reporter.report(record("Consume results"));

        let records = reporter.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
    }
}
