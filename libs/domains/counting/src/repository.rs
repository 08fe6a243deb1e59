use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StorageResult;
use crate::models::CountingResult;

/// Durable storage for counting results.
///
/// `save` completes only once the outcome is known; the caller logs success
/// or failure for the delivery based on it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save(&self, result: &CountingResult) -> StorageResult<()>;
}

/// In-memory store for development and tests
#[derive(Clone, Default)]
pub struct InMemoryResultStore {
    results: Arc<RwLock<Vec<CountingResult>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<CountingResult> {
        self.results.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.results.read().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save(&self, result: &CountingResult) -> StorageResult<()> {
        self.results.write().await.push(result.clone());
        Ok(())
    }
}
