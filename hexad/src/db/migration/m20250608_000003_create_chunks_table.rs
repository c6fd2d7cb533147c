use sea_orm_migration::prelude::*;

use crate::db::entity::chunk::{Column, Entity};
use crate::db::entity::{file, server};

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250608_000003_create_chunks_table"
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
                    .col(ColumnDef::new(Column::FileId).uuid().not_null())
                    .col(ColumnDef::new(Column::ChunkIndex).integer().not_null())
                    .col(ColumnDef::new(Column::ServerId).uuid().not_null())
                    .col(ColumnDef::new(Column::Size).big_integer().not_null())
                    .col(ColumnDef::new(Column::Checksum).string().not_null())
                    .col(
                        ColumnDef::new(Column::State)
                            .string_len(16)
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
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-chunks-file-id")
                            .from(Entity, Column::FileId)
                            .to(file::Entity, file::Column::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-chunks-server-id")
                            .from(Entity, Column::ServerId)
                            .to(server::Entity, server::Column::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-chunks-file-id")
                    .table(Entity)
                    .col(Column::FileId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-chunks-server-id")
                    .table(Entity)
                    .col(Column::ServerId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .unique()
                    .name("idx-chunks-file-id-chunk-index")
                    .table(Entity)
                    .col(Column::FileId)
                    .col(Column::ChunkIndex)
                    .to_owned(),
            )
            .await
    }
}
