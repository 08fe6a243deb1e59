use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait};
use tracing::debug;

use crate::{
    entity,
    error::StorageResult,
    models::CountingResult,
    repository::ResultStore,
};

/// PostgreSQL-backed result store
#[derive(Clone)]
pub struct PgResultStore {
    db: DatabaseConnection,
}

impl PgResultStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn save(&self, result: &CountingResult) -> StorageResult<()> {
        let active_model: entity::ActiveModel = result.into();

        let inserted = entity::Entity::insert(active_model)
            .exec(&self.db)
            .await?;

        debug!(
            row_id = %inserted.last_insert_id,
            entity_id = %result.id,
            "Inserted counting result"
        );
        Ok(())
    }
}
