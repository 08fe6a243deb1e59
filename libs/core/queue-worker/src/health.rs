//! Health check handlers for queue workers.
//!
//! This module provides reusable Axum handlers for:
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`)
//! - Prometheus metrics (`/metrics`)

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use lapin::ConnectionStatus;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::liveness::{HeartbeatMonitor, LivenessState};
use crate::metrics;

/// A dependency the worker needs before it can do useful work
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` carries a short reason shown in the readiness response
    async fn check(&self) -> Result<(), String>;
}

/// Ready while the AMQP connection is open
pub struct AmqpProbe {
    status: ConnectionStatus,
}

impl AmqpProbe {
    pub fn new(status: ConnectionStatus) -> Self {
        Self { status }
    }
}

#[async_trait]
impl ReadinessProbe for AmqpProbe {
    fn name(&self) -> &str {
        "rabbitmq"
    }

    async fn check(&self) -> Result<(), String> {
        if self.status.connected() {
            Ok(())
        } else {
            Err(format!("connection state {:?}", self.status.state()))
        }
    }
}

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub app_name: String,
    pub app_version: String,
    pub queue_name: String,
    pub heartbeat: HeartbeatMonitor,
    pub probes: Vec<Arc<dyn ReadinessProbe>>,
}

impl HealthState {
    pub fn new(
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        queue_name: impl Into<String>,
        heartbeat: HeartbeatMonitor,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            app_version: app_version.into(),
            queue_name: queue_name.into(),
            heartbeat,
            probes: Vec::new(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probes.push(probe);
        self
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: String,
    pub version: String,
    pub queue: String,
    pub liveness: LivenessState,
    pub heartbeats: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Liveness probe handler.
///
/// Returns 503 once the liveness loop has stopped.
pub async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let liveness = state.heartbeat.state();
    let (code, status) = match liveness {
        LivenessState::Stopped => (StatusCode::SERVICE_UNAVAILABLE, "stopped"),
        LivenessState::Idle => (StatusCode::OK, "starting"),
        LivenessState::Running => (StatusCode::OK, "healthy"),
    };

    (
        code,
        Json(HealthResponse {
            status,
            name: state.app_name,
            version: state.app_version,
            queue: state.queue_name,
            liveness,
            heartbeats: state.heartbeat.heartbeat_count(),
            last_heartbeat: state.heartbeat.last_heartbeat(),
        }),
    )
}

/// Readiness probe handler.
///
/// Runs every registered probe; any failure makes the worker not ready.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let mut checks = Map::new();
    let mut ready = true;

    for probe in &state.probes {
        let result = match probe.check().await {
            Ok(()) => "ok".to_string(),
            Err(reason) => {
                ready = false;
                format!("error: {}", reason)
            }
        };
        checks.insert(probe.name().to_string(), Value::String(result));
    }

    if ready {
        Ok((
            StatusCode::OK,
            Json(json!({ "status": "ready", "checks": checks })),
        ))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "checks": checks })),
        ))
    }
}

/// Prometheus metrics endpoint handler.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Create a standard health router.
///
/// - `/health` - Liveness probe
/// - `/healthz` - Liveness probe (K8s style)
/// - `/ready` - Readiness probe
/// - `/readyz` - Readiness probe (K8s style)
/// - `/metrics` - Prometheus metrics
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
