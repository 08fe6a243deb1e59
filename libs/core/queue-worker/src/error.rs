//! Queue worker error types
//!
//! Only [`QueueError`] ever leaves the pipeline. Decode and telemetry errors
//! are contained inside a single delivery.

use thiserror::Error;

/// Errors raised by the broker connection and subscription
#[derive(Error, Debug)]
pub enum QueueError {
    /// Broker unreachable, invalid URI, or queue declaration refused
    #[error("Connection error: {0}")]
    Connection(String),

    /// The delivery stream ended
    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),

    /// The delivery stream yielded an error
    #[error("Consume error: {0}")]
    Consume(String),

    /// Subscription settings rejected before contacting the broker
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    pub fn connection(context: &str, err: impl std::fmt::Display) -> Self {
        QueueError::Connection(format!("{}: {}", context, err))
    }

    /// Whether this error came from losing the broker after startup
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            QueueError::SubscriptionClosed(_) | QueueError::Consume(_)
        )
    }
}

/// Payload could not be turned into a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Syntax error or truncated input
    #[error("Malformed JSON: {0}")]
    Malformed(String),

    #[error("Expected a JSON object, found {0}")]
    NotAnObject(String),

    /// Missing field or wrong type
    #[error("Schema mismatch: {0}")]
    Schema(String),
}

/// Telemetry could not be exported. Never propagated to the pipeline.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Telemetry sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Telemetry buffer full")]
    BufferFull,
}
