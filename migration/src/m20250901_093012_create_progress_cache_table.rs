use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProgressCache::Table)
                    .if_not_exists()
                    .col(string(ProgressCache::ContentId).primary_key())
                    .col(string(ProgressCache::Kind))
                    .col(double(ProgressCache::Position))
                    .col(double(ProgressCache::Total))
                    .col(double(ProgressCache::PercentComplete))
                    .col(timestamp_with_time_zone(ProgressCache::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProgressCache::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
pub enum ProgressCache {
    Table,
    ContentId,
    Kind,
    Position,
    Total,
    PercentComplete,
    UpdatedAt,
}
