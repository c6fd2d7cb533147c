use sea_orm_migration::prelude::*;

use crate::db::entity::server::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250608_000002_create_storage_servers_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Entity)
                    .col(ColumnDef::new(Column::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Column::Address)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Column::State)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Column::AvailableBytes)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Column::UsedBytes).big_integer().not_null())
                    .col(
                        ColumnDef::new(Column::LastHeartbeat)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Column::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Column::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-storage-servers-state")
                    .table(Entity)
                    .col(Column::State)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-storage-servers-last-heartbeat")
                    .table(Entity)
                    .col(Column::LastHeartbeat)
                    .to_owned(),
            )
            .await
    }
}
