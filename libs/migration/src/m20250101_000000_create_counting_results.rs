use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per delivery, no uniqueness on entity_id
        manager
            .create_table(
                Table::create()
                    .table(CountingResults::Table)
                    .if_not_exists()
                    .col(pk_uuid(CountingResults::Id))
                    .col(string(CountingResults::EntityId))
                    .col(big_integer(CountingResults::Count))
                    .col(timestamp_with_time_zone(CountingResults::ProducedAt))
                    .col(string_null(CountingResults::Producer))
                    .col(string_null(CountingResults::Kernel))
                    .col(string_null(CountingResults::Framework))
                    .col(text_null(CountingResults::Message))
                    .col(
                        timestamp_with_time_zone(CountingResults::ReceivedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_counting_results_entity_id")
                    .table(CountingResults::Table)
                    .col(CountingResults::EntityId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_counting_results_produced_at")
                    .table(CountingResults::Table)
                    .col(CountingResults::ProducedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CountingResults::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum CountingResults {
    Table,
    Id,
    EntityId,
    Count,
    ProducedAt,
    Producer,
    Kernel,
    Framework,
    Message,
    ReceivedAt,
}
