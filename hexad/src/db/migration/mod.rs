//! Database migrations.

pub use sea_orm_migration::*;

mod m20250608_000001_create_files_table;
mod m20250608_000002_create_storage_servers_table;
mod m20250608_000003_create_chunks_table;
mod m20250608_000004_create_ring_nodes_table;
mod m20250608_000005_create_upload_sessions_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250608_000001_create_files_table::Migration),
            Box::new(m20250608_000002_create_storage_servers_table::Migration),
            Box::new(m20250608_000003_create_chunks_table::Migration),
            Box::new(m20250608_000004_create_ring_nodes_table::Migration),
            Box::new(m20250608_000005_create_upload_sessions_table::Migration),
        ]
    }
}
