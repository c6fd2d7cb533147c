use sea_orm_migration::prelude::*;

use crate::db::entity::ring_node::{Column, Entity};
use crate::db::entity::server;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250608_000004_create_ring_nodes_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Entity)
                    .col(
                        ColumnDef::new(Column::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Column::ServerId).uuid().not_null())
                    .col(ColumnDef::new(Column::VirtualIndex).integer().not_null())
                    .col(ColumnDef::new(Column::HashValue).big_integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-ring-nodes-server-id")
                            .from(Entity, Column::ServerId)
                            .to(server::Entity, server::Column::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-ring-nodes-hash-value")
                    .table(Entity)
                    .col(Column::HashValue)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .unique()
                    .name("idx-ring-nodes-server-id-virtual-index")
                    .table(Entity)
                    .col(Column::ServerId)
                    .col(Column::VirtualIndex)
                    .to_owned(),
            )
            .await
    }
}
