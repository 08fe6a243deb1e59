use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::error::QueueError;

/// Settles a delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<(), QueueError>;
}

/// Acknowledger for `no_ack` subscriptions.
///
/// The broker settled the delivery when it was sent, so there is nothing to
/// send back.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerAutoAck;

#[async_trait]
impl Acknowledger for BrokerAutoAck {
    async fn ack(&self, delivery_tag: u64) -> Result<(), QueueError> {
        trace!(delivery_tag, "Delivery auto-acknowledged by broker");
        Ok(())
    }
}

/// One delivery as handed to the pipeline.
///
/// Owned by exactly one handler invocation and dropped when it returns.
#[derive(Clone)]
pub struct DeliveryEnvelope {
    pub payload: Vec<u8>,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub received_at: DateTime<Utc>,
    acker: Arc<dyn Acknowledger>,
}

impl DeliveryEnvelope {
    pub fn new(payload: Vec<u8>, delivery_tag: u64, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            payload,
            delivery_tag,
            redelivered: false,
            received_at: Utc::now(),
            acker,
        }
    }

    /// Envelope for an auto-acked delivery
    pub fn auto_acked(payload: impl Into<Vec<u8>>, delivery_tag: u64) -> Self {
        Self::new(payload.into(), delivery_tag, Arc::new(BrokerAutoAck))
    }

    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    pub async fn acknowledge(&self) -> Result<(), QueueError> {
        self.acker.ack(self.delivery_tag).await
    }

    /// Payload as text, invalid sequences replaced
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl fmt::Debug for DeliveryEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryEnvelope")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("received_at", &self.received_at)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
