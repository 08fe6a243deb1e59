use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;

/// Sea-ORM Entity for the counting_results table
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "counting_results")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub entity_id: String,
    pub count: i64,
    pub produced_at: DateTimeWithTimeZone,
    pub producer: Option<String>,
    pub kernel: Option<String>,
    pub framework: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub message: Option<String>,
    pub received_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

// Conversion from Sea-ORM Model to domain CountingResult
impl From<Model> for crate::models::CountingResult {
    fn from(model: Model) -> Self {
        Self {
            id: model.entity_id,
            count: model.count,
            timestamp: model.produced_at.into(),
            producer: model.producer,
            kernel: model.kernel,
            framework: model.framework,
            message: model.message,
        }
    }
}

// One row per delivery; the row id is generated here
impl From<&crate::models::CountingResult> for ActiveModel {
    fn from(result: &crate::models::CountingResult) -> Self {
        ActiveModel {
            id: Set(Uuid::now_v7()),
            entity_id: Set(result.id.clone()),
            count: Set(result.count),
            produced_at: Set(result.timestamp.into()),
            producer: Set(result.producer.clone()),
            kernel: Set(result.kernel.clone()),
            framework: Set(result.framework.clone()),
            message: Set(result.message.clone()),
            received_at: Set(chrono::Utc::now().into()),
        }
    }
}
