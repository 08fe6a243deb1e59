//! Core pipeline traits and the generic QueueWorker implementation.
//!
//! This module provides:
//! - `PayloadDecoder` trait turning raw bytes into a record
//! - `QueueProcessor` trait handling decoded records
//! - `QueueWorker` struct running the per-delivery state machine

use async_trait::async_trait;
use chrono::Utc;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::QueueWorkerConfig;
use crate::consumer::DeliverySource;
use crate::envelope::DeliveryEnvelope;
use crate::error::{DecodeError, QueueError};
use crate::liveness::{LivenessLoop, LivenessState};
use crate::metrics::QueueMetrics;
use crate::telemetry::{DependencyRecord, TelemetryReporter};

/// Turns a raw payload into a record. All-or-nothing.
pub trait PayloadDecoder<T>: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<T, DecodeError>;
}

/// Handles a decoded record, typically by persisting it.
///
/// # Example
///
/// ```rust,ignore
/// use queue_worker::QueueProcessor;
///
/// struct ResultProcessor<S> { store: S }
///
/// #[async_trait]
/// impl<S: ResultStore> QueueProcessor<CountingResult> for ResultProcessor<S> {
///     type Error = StorageError;
///
///     async fn process(&self, record: CountingResult) -> Result<(), StorageError> {
///         self.store.save(&record).await
///     }
///
///     fn name(&self) -> &str {
///         "ResultProcessor"
///     }
/// }
/// ```
#[async_trait]
pub trait QueueProcessor<T: Send + 'static>: Send + Sync {
    type Error: Display + Send;

    async fn process(&self, record: T) -> Result<(), Self::Error>;

    /// Processor name for logging
    fn name(&self) -> &str;
}

/// What happened to a single delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Stored,
    DecodeFailed,
    StorageFailed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Stored => "stored",
            DeliveryOutcome::DecodeFailed => "decode_failed",
            DeliveryOutcome::StorageFailed => "storage_failed",
        }
    }
}

/// Generic queue worker.
///
/// Each delivery runs through: acknowledge, start the clock, decode, stop the
/// clock and report one dependency record, process. Errors in a delivery stay
/// in that delivery. Nothing is retried or requeued.
///
/// # Concurrency
///
/// `run` spawns one task per delivery, at most `max_concurrent_deliveries` at
/// a time. Handlers share only read-only configuration and the injected
/// decoder, processor and reporter.
pub struct QueueWorker<T, D, P> {
    decoder: Arc<D>,
    processor: Arc<P>,
    reporter: Arc<dyn TelemetryReporter>,
    config: Arc<QueueWorkerConfig>,
    metrics: QueueMetrics,
    concurrency_semaphore: Arc<Semaphore>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T, D, P> Clone for QueueWorker<T, D, P> {
    fn clone(&self) -> Self {
        Self {
            decoder: Arc::clone(&self.decoder),
            processor: Arc::clone(&self.processor),
            reporter: Arc::clone(&self.reporter),
            config: Arc::clone(&self.config),
            metrics: self.metrics.clone(),
            concurrency_semaphore: Arc::clone(&self.concurrency_semaphore),
            _phantom: PhantomData,
        }
    }
}

impl<T, D, P> QueueWorker<T, D, P>
where
    T: Send + 'static,
    D: PayloadDecoder<T> + 'static,
    P: QueueProcessor<T> + 'static,
{
    pub fn new(
        decoder: D,
        processor: P,
        reporter: Arc<dyn TelemetryReporter>,
        config: QueueWorkerConfig,
    ) -> Self {
        Self::with_arc_processor(decoder, Arc::new(processor), reporter, config)
    }

    pub fn with_arc_processor(
        decoder: D,
        processor: Arc<P>,
        reporter: Arc<dyn TelemetryReporter>,
        config: QueueWorkerConfig,
    ) -> Self {
        let concurrency_semaphore = Arc::new(Semaphore::new(config.max_concurrent_deliveries));
        let metrics = QueueMetrics::new(&config.queue_name);

        Self {
            decoder: Arc::new(decoder),
            processor,
            reporter,
            config: Arc::new(config),
            metrics,
            concurrency_semaphore,
            _phantom: PhantomData,
        }
    }

    pub fn config(&self) -> &QueueWorkerConfig {
        &self.config
    }

    /// Handle one delivery to completion.
    ///
    /// Exactly one dependency record is reported per call, with
    /// `success = true`: the consume itself succeeded even when the content
    /// was unusable.
    pub async fn handle_delivery(&self, envelope: DeliveryEnvelope) -> DeliveryOutcome {
        if let Err(e) = envelope.acknowledge().await {
            warn!(delivery_tag = envelope.delivery_tag, error = %e, "Failed to acknowledge delivery");
        }
        self.metrics.delivery_received();

        let start_time = Utc::now();
        let timer = Instant::now();
        let queue = &self.config.queue_name;
        let content = envelope.payload_lossy();

        info!(
            queue = %queue,
            delivery_tag = envelope.delivery_tag,
            redelivered = envelope.redelivered,
            "[{} | New message] {}",
            queue,
            content
        );

        let decoded = self.decoder.decode(&envelope.payload);
        let duration = timer.elapsed();

        self.reporter.report(DependencyRecord {
            name: self.config.dependency_name.clone(),
            target: self.config.consume_target(),
            data: content,
            start_time,
            duration,
            success: true,
        });

        let outcome = match decoded {
            Err(e) => {
                error!(
                    queue = %queue,
                    delivery_tag = envelope.delivery_tag,
                    error = %e,
                    "Invalid payload for result"
                );
                DeliveryOutcome::DecodeFailed
            }
            Ok(record) => match self.processor.process(record).await {
                Ok(()) => {
                    info!(
                        queue = %queue,
                        delivery_tag = envelope.delivery_tag,
                        "Result stored successfully"
                    );
                    DeliveryOutcome::Stored
                }
                Err(e) => {
                    error!(
                        queue = %queue,
                        delivery_tag = envelope.delivery_tag,
                        processor = self.processor.name(),
                        "Error while storing result: {}",
                        e
                    );
                    DeliveryOutcome::StorageFailed
                }
            },
        };

        self.metrics.delivery_handled(outcome, timer.elapsed());
        outcome
    }

    /// Run the pipeline until shutdown or until the subscription fails.
    ///
    /// On shutdown no further deliveries are taken and in-flight handlers run
    /// to completion before returning `Ok(())`. A delivery stream that ends or
    /// errors is returned as `SubscriptionClosed` or `Consume`, also after
    /// draining.
    pub async fn run<S>(
        &self,
        source: &mut S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), QueueError>
    where
        S: DeliverySource + ?Sized,
    {
        info!(
            queue = %self.config.queue_name,
            processor = self.processor.name(),
            max_concurrent_deliveries = self.config.max_concurrent_deliveries,
            "Queue = {}",
            self.config.queue_name
        );
        info!("Waiting for messages...");

        let mut in_flight: JoinSet<DeliveryOutcome> = JoinSet::new();

        let result = loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Received shutdown signal, stopping worker");
                    break Ok(());
                }
                permit = Arc::clone(&self.concurrency_semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Err(QueueError::Internal("Delivery semaphore closed".to_string())),
                },
            };

            let next = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Received shutdown signal, stopping worker");
                    break Ok(());
                }
                next = source.next_delivery() => next,
            };

            match next {
                Some(Ok(envelope)) => {
                    let worker = self.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        worker.handle_delivery(envelope).await
                    });
                    self.metrics.in_flight(in_flight.len());
                }
                Some(Err(e)) => {
                    error!(queue = %self.config.queue_name, error = %e, "Delivery stream failed");
                    break Err(e);
                }
                None => {
                    warn!(queue = %self.config.queue_name, "Delivery stream ended");
                    break Err(QueueError::SubscriptionClosed(format!(
                        "consumer on queue {} was cancelled or the connection dropped",
                        self.config.queue_name
                    )));
                }
            }

            while let Some(joined) = in_flight.try_join_next() {
                log_join_result(joined);
            }
        };

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "Waiting for in-flight deliveries");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join_result(joined);
        }
        self.metrics.in_flight(0);

        info!(queue = %self.config.queue_name, "Queue worker stopped");
        result
    }

    /// Run the pipeline with a liveness loop beside it.
    ///
    /// The loop stops as soon as `shutdown` is set, without waiting for
    /// in-flight deliveries to drain, or when the pipeline returns on its own.
    pub async fn run_with_liveness<S>(
        &self,
        source: &mut S,
        liveness: LivenessLoop,
        shutdown: watch::Receiver<bool>,
    ) -> (Result<(), QueueError>, LivenessState)
    where
        S: DeliverySource + ?Sized,
    {
        let (pipeline_done_tx, mut pipeline_done) = watch::channel(false);
        let (beat_stop_tx, beat_stop_rx) = watch::channel(false);

        let heartbeat = tokio::spawn(liveness.run(beat_stop_rx));

        let mut process_shutdown = shutdown.clone();
        let relay = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_requested(&mut process_shutdown) => {}
                _ = shutdown_requested(&mut pipeline_done) => {}
            }
            let _ = beat_stop_tx.send(true);
        });

        let result = self.run(source, shutdown).await;

        let _ = pipeline_done_tx.send(true);
        if let Err(e) = relay.await {
            warn!(error = %e, "Liveness relay task failed");
        }
        let state = match heartbeat.await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Liveness loop task failed");
                LivenessState::Stopped
            }
        };

        (result, state)
    }
}

/// Resolves once the shutdown flag is set or its sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn log_join_result(joined: Result<DeliveryOutcome, JoinError>) {
    match joined {
        Ok(outcome) => debug!(outcome = outcome.as_str(), "Delivery handled"),
        Err(e) if e.is_panic() => error!(error = %e, "Delivery handler panicked"),
        Err(e) => warn!(error = %e, "Delivery handler cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::HeartbeatMonitor;
    use crate::telemetry::RecordingTelemetryReporter;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Reading {
        id: String,
        count: i64,
    }

    struct ReadingDecoder;

    impl PayloadDecoder<Reading> for ReadingDecoder {
        fn decode(&self, payload: &[u8]) -> Result<Reading, DecodeError> {
            let text =
                std::str::from_utf8(payload).map_err(|e| DecodeError::InvalidUtf8(e.to_string()))?;
            let (id, count) = text
                .split_once(':')
                .ok_or_else(|| DecodeError::Malformed(text.to_string()))?;
            let count = count
                .parse()
                .map_err(|_| DecodeError::Schema(format!("count: {}", count)))?;
            Ok(Reading {
                id: id.to_string(),
                count,
            })
        }
    }

    /// Shared log of everything that happened, in order
    type Events = Arc<Mutex<Vec<String>>>;

    struct EventAcker {
        events: Events,
    }

    #[async_trait]
    impl crate::envelope::Acknowledger for EventAcker {
        async fn ack(&self, delivery_tag: u64) -> Result<(), QueueError> {
            self.events.lock().unwrap().push(format!("ack {}", delivery_tag));
            Ok(())
        }
    }

    struct RecordingProcessor {
        events: Events,
        fail_ids: Vec<String>,
    }

    #[async_trait]
    impl QueueProcessor<Reading> for RecordingProcessor {
        type Error = String;

        async fn process(&self, record: Reading) -> Result<(), String> {
            self.events.lock().unwrap().push(format!("save {}", record.id));
            if self.fail_ids.contains(&record.id) {
                return Err(format!("connection reset while saving {}", record.id));
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "RecordingProcessor"
        }
    }

    struct ScriptedSource {
        items: VecDeque<Result<DeliveryEnvelope, QueueError>>,
        hang_when_empty: bool,
    }

    #[async_trait]
    impl DeliverySource for ScriptedSource {
        async fn next_delivery(&mut self) -> Option<Result<DeliveryEnvelope, QueueError>> {
            match self.items.pop_front() {
                Some(item) => Some(item),
                None if self.hang_when_empty => std::future::pending().await,
                None => None,
            }
        }
    }

    struct Harness {
        events: Events,
        reporter: RecordingTelemetryReporter,
        worker: QueueWorker<Reading, ReadingDecoder, RecordingProcessor>,
    }

    fn harness(fail_ids: &[&str]) -> Harness {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let reporter = RecordingTelemetryReporter::new();
        let processor = RecordingProcessor {
            events: events.clone(),
            fail_ids: fail_ids.iter().map(|s| s.to_string()).collect(),
        };
        let worker = QueueWorker::new(
            ReadingDecoder,
            processor,
            Arc::new(reporter.clone()),
            QueueWorkerConfig::new("results").with_max_concurrent_deliveries(1),
        );
        Harness {
            events,
            reporter,
            worker,
        }
    }

    fn envelope(events: &Events, payload: &str, tag: u64) -> DeliveryEnvelope {
        DeliveryEnvelope::new(
            payload.as_bytes().to_vec(),
            tag,
            Arc::new(EventAcker {
                events: events.clone(),
            }),
        )
    }

    #[tokio::test]
    async fn test_valid_delivery_is_acked_before_save() {
        let h = harness(&[]);

        let outcome = h.worker.handle_delivery(envelope(&h.events, "A1:5", 1)).await;

        assert_eq!(outcome, DeliveryOutcome::Stored);
        assert_eq!(*h.events.lock().unwrap(), vec!["ack 1", "save A1"]);

        let records = h.reporter.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "RabbitMQ");
        assert_eq!(records[0].target, "Consume results");
        assert_eq!(records[0].data, "A1:5");
        assert!(records[0].success);
    }

    #[tokio::test]
    async fn test_decode_failure_skips_processing() {
        let h = harness(&[]);

        let outcome = h.worker.handle_delivery(envelope(&h.events, "not-a-reading", 2)).await;

        assert_eq!(outcome, DeliveryOutcome::DecodeFailed);
        assert_eq!(*h.events.lock().unwrap(), vec!["ack 2"]);

        let records = h.reporter.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
    }

    #[tokio::test]
    async fn test_processing_failure_is_contained() {
        let h = harness(&["B2"]);

        let outcome = h.worker.handle_delivery(envelope(&h.events, "B2:1", 3)).await;

        assert_eq!(outcome, DeliveryOutcome::StorageFailed);
        // One save attempt, no retry
        assert_eq!(*h.events.lock().unwrap(), vec!["ack 3", "save B2"]);
        assert_eq!(h.reporter.records().len(), 1);
        assert!(h.reporter.records()[0].success);
    }

    #[tokio::test]
    async fn test_run_keeps_going_after_failures() {
        let h = harness(&["B2"]);
        let mut source = ScriptedSource {
            items: VecDeque::from(vec![
                Ok(envelope(&h.events, "B2:1", 1)),
                Ok(envelope(&h.events, "garbage", 2)),
                Ok(envelope(&h.events, "C3:9", 3)),
            ]),
            hang_when_empty: false,
        };
        let (_tx, rx) = watch::channel(false);

        let result = h.worker.run(&mut source, rx).await;

        // Stream end is reported, after every delivery was handled
        assert!(matches!(result, Err(QueueError::SubscriptionClosed(_))));
        let events = h.events.lock().unwrap().clone();
        assert!(events.contains(&"save B2".to_string()));
        assert!(events.contains(&"save C3".to_string()));
        assert_eq!(events.iter().filter(|e| e.starts_with("ack")).count(), 3);
        assert_eq!(h.reporter.records().len(), 3);
    }

    #[tokio::test]
    async fn test_run_surfaces_consume_error() {
        let h = harness(&[]);
        let mut source = ScriptedSource {
            items: VecDeque::from(vec![
                Ok(envelope(&h.events, "A1:1", 1)),
                Err(QueueError::Consume("connection reset by peer".to_string())),
            ]),
            hang_when_empty: true,
        };
        let (_tx, rx) = watch::channel(false);

        let result = h.worker.run(&mut source, rx).await;

        assert!(matches!(result, Err(QueueError::Consume(_))));
        assert!(h.events.lock().unwrap().contains(&"save A1".to_string()));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_drains() {
        let h = harness(&[]);
        let mut source = ScriptedSource {
            items: VecDeque::from(vec![
                Ok(envelope(&h.events, "A1:1", 1)),
                Ok(envelope(&h.events, "A2:2", 2)),
            ]),
            hang_when_empty: true,
        };
        let (tx, rx) = watch::channel(false);

        let worker = h.worker.clone();
        let run = tokio::spawn(async move { worker.run(&mut source, rx).await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        assert!(run.await.unwrap().is_ok());
        assert_eq!(h.reporter.records().len(), 2);
    }

    #[tokio::test]
    async fn test_run_returns_immediately_when_already_cancelled() {
        let h = harness(&[]);
        let mut source = ScriptedSource {
            items: VecDeque::from(vec![Ok(envelope(&h.events, "A1:1", 1))]),
            hang_when_empty: true,
        };
        let (_tx, rx) = watch::channel(true);

        assert!(h.worker.run(&mut source, rx).await.is_ok());
        assert!(h.events.lock().unwrap().is_empty());
    }

    /// Holds each record inside `process` until a release permit is added
    #[derive(Clone)]
    struct GatedProcessor {
        entered: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        release: Arc<Semaphore>,
    }

    #[async_trait]
    impl QueueProcessor<Reading> for GatedProcessor {
        type Error = String;

        async fn process(&self, _record: Reading) -> Result<(), String> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let permit = self.release.acquire().await.map_err(|e| e.to_string());
            self.active.fetch_sub(1, Ordering::SeqCst);
            permit?.forget();
            Ok(())
        }

        fn name(&self) -> &str {
            "GatedProcessor"
        }
    }

    fn gated_worker(
        max_concurrent: usize,
    ) -> (QueueWorker<Reading, ReadingDecoder, GatedProcessor>, GatedProcessor) {
        let gate = GatedProcessor {
            entered: Arc::default(),
            active: Arc::default(),
            peak: Arc::default(),
            release: Arc::new(Semaphore::new(0)),
        };
        let worker = QueueWorker::new(
            ReadingDecoder,
            gate.clone(),
            Arc::new(RecordingTelemetryReporter::new()),
            QueueWorkerConfig::new("results").with_max_concurrent_deliveries(max_concurrent),
        );
        (worker, gate)
    }

    fn pending_source(payloads: &[&str]) -> ScriptedSource {
        ScriptedSource {
            items: payloads
                .iter()
                .enumerate()
                .map(|(i, p)| Ok(DeliveryEnvelope::auto_acked(p.as_bytes().to_vec(), i as u64 + 1)))
                .collect(),
            hang_when_empty: true,
        }
    }

    async fn wait_until(counter: &AtomicUsize, expected: usize) {
        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("counter never reached {}", expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliveries_run_concurrently_up_to_limit() {
        let (worker, gate) = gated_worker(2);
        let mut source = pending_source(&["A1:1", "A2:2", "A3:3"]);
        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(async move { worker.run(&mut source, rx).await });

        wait_until(&gate.entered, 2).await;
        assert_eq!(gate.active.load(Ordering::SeqCst), 2);

        // Third delivery waits for a free slot
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(gate.entered.load(Ordering::SeqCst), 2);

        gate.release.add_permits(1);
        wait_until(&gate.entered, 3).await;
        assert_eq!(gate.peak.load(Ordering::SeqCst), 2);

        gate.release.add_permits(2);
        tx.send(true).unwrap();
        assert!(run.await.unwrap().is_ok());
        assert_eq!(gate.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_stops_on_shutdown_while_draining() {
        let (worker, gate) = gated_worker(1);
        let mut source = pending_source(&["A1:1"]);
        let monitor = HeartbeatMonitor::new();
        let liveness = LivenessLoop::new(Duration::from_millis(100), monitor.clone());
        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(async move {
            worker.run_with_liveness(&mut source, liveness, rx).await
        });

        wait_until(&gate.entered, 1).await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(monitor.heartbeat_count() >= 1);

        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.state(), LivenessState::Stopped);
        let beats = monitor.heartbeat_count();

        // The handler is still inside `process`, the pipeline is draining
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(monitor.heartbeat_count(), beats);
        assert!(!run.is_finished());

        gate.release.add_permits(1);
        let (result, state) = run.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(state, LivenessState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_stops_when_subscription_ends() {
        let h = harness(&[]);
        let mut source = ScriptedSource {
            items: VecDeque::from(vec![Ok(envelope(&h.events, "A1:1", 1))]),
            hang_when_empty: false,
        };
        let monitor = HeartbeatMonitor::new();
        let (_tx, rx) = watch::channel(false);

        let (result, state) = h
            .worker
            .run_with_liveness(
                &mut source,
                LivenessLoop::new(Duration::from_millis(100), monitor.clone()),
                rx,
            )
            .await;

        assert!(matches!(result, Err(QueueError::SubscriptionClosed(_))));
        assert_eq!(state, LivenessState::Stopped);
        assert_eq!(monitor.state(), LivenessState::Stopped);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(DeliveryOutcome::Stored.as_str(), "stored");
        assert_eq!(DeliveryOutcome::DecodeFailed.as_str(), "decode_failed");
        assert_eq!(DeliveryOutcome::StorageFailed.as_str(), "storage_failed");
    }
}
