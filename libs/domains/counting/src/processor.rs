//! Counting result processor for queue workers.
//!
//! `CountingResultProcessor` implements `QueueProcessor<CountingResult>` by
//! saving each decoded result once. Failures are returned to the pipeline,
//! which logs them; nothing is retried here.

use async_trait::async_trait;
use queue_worker::QueueProcessor;
use std::sync::Arc;
use tracing::debug;

use crate::error::StorageError;
use crate::models::CountingResult;
use crate::repository::ResultStore;

pub struct CountingResultProcessor<S: ResultStore> {
    store: Arc<S>,
}

impl<S: ResultStore> CountingResultProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn with_arc_store(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: ResultStore + 'static> QueueProcessor<CountingResult> for CountingResultProcessor<S> {
    type Error = StorageError;

    async fn process(&self, record: CountingResult) -> Result<(), StorageError> {
        debug!(entity_id = %record.id, count = record.count, "Saving counting result");
        self.store.save(&record).await
    }

    fn name(&self) -> &str {
        "CountingResultProcessor"
    }
}
