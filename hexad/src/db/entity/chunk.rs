//! One of the six chunks of a file.

use sea_orm::entity::prelude::*;

pub type ChunkModel = Model;

/// The lifecycle state of a chunk.
#[derive(EnumIter, DeriveActiveEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum ChunkState {
    /// Placement decided; the chunk server has not acknowledged yet.
    #[sea_orm(string_value = "pending")]
    Pending,

    /// The owning server acknowledged a checksum-verified write.
    ///
    /// Completed chunks are immutable.
    #[sea_orm(string_value = "completed")]
    Completed,

    /// The transfer failed.
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl ChunkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One of the six chunks of a file.
///
/// `server_id` is a logical binding: the chunk remains placed on that
/// server even if the server later goes inactive, it is just
/// unreachable until the server returns.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "chunks")]
pub struct Model {
    /// Unique ID of the chunk; also the placement key on the ring.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// The owning file.
    #[sea_orm(indexed)]
    pub file_id: Uuid,

    /// Position within the file, 0 through 5.
    ///
    /// `(file_id, chunk_index)` is unique.
    pub chunk_index: i32,

    /// The server this chunk was placed on.
    #[sea_orm(indexed)]
    pub server_id: Uuid,

    /// Byte length of this chunk.
    pub size: i64,

    /// Hex SHA-256 of the chunk bytes.
    pub checksum: String,

    /// The lifecycle state.
    pub state: ChunkState,

    /// Timestamp when the chunk row was created.
    pub created_at: ChronoDateTimeUtc,

    /// Timestamp of the last state change.
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::file::Entity",
        from = "Column::FileId",
        to = "super::file::Column::Id",
        on_delete = "Cascade"
    )]
    File,

    #[sea_orm(
        belongs_to = "super::server::Entity",
        from = "Column::ServerId",
        to = "super::server::Column::Id"
    )]
    Server,
}

impl Related<super::file::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::File.def()
    }
}

impl Related<super::server::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Server.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
