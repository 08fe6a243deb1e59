//! Liveness heartbeat
//!
//! Runs next to the pipeline for the lifetime of the process and shares only
//! the shutdown signal with it. State moves `Idle -> Running -> Stopped`.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessState {
    Idle,
    Running,
    Stopped,
}

impl LivenessState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LivenessState::Running,
            2 => LivenessState::Stopped,
            _ => LivenessState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LivenessState::Idle => 0,
            LivenessState::Running => 1,
            LivenessState::Stopped => 2,
        }
    }
}

/// Heartbeat state shared between the loop and the health endpoints
#[derive(Clone, Debug)]
pub struct HeartbeatMonitor {
    inner: Arc<MonitorInner>,
}

#[derive(Debug)]
struct MonitorInner {
    state: AtomicU8,
    beats: AtomicU64,
    last_beat: RwLock<Option<DateTime<Utc>>>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                state: AtomicU8::new(LivenessState::Idle.as_u8()),
                beats: AtomicU64::new(0),
                last_beat: RwLock::new(None),
            }),
        }
    }

    pub fn state(&self) -> LivenessState {
        LivenessState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.inner.beats.load(Ordering::SeqCst)
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.inner.last_beat.read().ok().and_then(|last| *last)
    }

    fn set_state(&self, state: LivenessState) {
        self.inner.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn record_beat(&self, at: DateTime<Utc>) {
        self.inner.beats.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.inner.last_beat.write() {
            *last = Some(at);
        }
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic `Worker active` heartbeat
pub struct LivenessLoop {
    interval: Duration,
    monitor: HeartbeatMonitor,
}

impl LivenessLoop {
    pub fn new(interval: Duration, monitor: HeartbeatMonitor) -> Self {
        Self { interval, monitor }
    }

    pub fn monitor(&self) -> &HeartbeatMonitor {
        &self.monitor
    }

    /// Beat once per interval until the shutdown signal is set.
    ///
    /// Cancellation is checked before every beat and observed while waiting,
    /// so the loop stops without waiting out the current interval. A closed
    /// signal channel counts as cancellation.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> LivenessState {
        self.monitor.set_state(LivenessState::Running);
        info!(interval_ms = self.interval.as_millis() as u64, "Liveness loop started");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            info!("Worker active at: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
            self.monitor.record_beat(Utc::now());
            metrics::record_heartbeat();

            if self.cancelled_during_wait(&mut shutdown).await {
                break;
            }
        }

        self.monitor.set_state(LivenessState::Stopped);
        info!(
            heartbeats = self.monitor.heartbeat_count(),
            "Liveness loop stopped"
        );
        LivenessState::Stopped
    }

    /// Sleep one interval. Returns true as soon as cancellation is seen.
    async fn cancelled_during_wait(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let tick = tokio::time::sleep(self.interval);
        tokio::pin!(tick);

        loop {
            tokio::select! {
                _ = &mut tick => return false,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        return true;
                    }
                }
            }
        }
    }
}
