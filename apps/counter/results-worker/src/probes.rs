//! Readiness probes owned by the worker process

use async_trait::async_trait;
use database::postgres::{DatabaseConnection, check_health};
use queue_worker::ReadinessProbe;

/// Ready while Postgres answers `SELECT 1`
pub struct PostgresProbe {
    db: DatabaseConnection,
}

impl PostgresProbe {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReadinessProbe for PostgresProbe {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn check(&self) -> Result<(), String> {
        check_health(&self.db).await.map_err(|e| e.to_string())
    }
}
