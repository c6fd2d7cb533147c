//! A stored file.

use sea_orm::entity::prelude::*;

pub type FileModel = Model;

/// The lifecycle state of a file.
#[derive(EnumIter, DeriveActiveEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum FileState {
    /// Metadata exists; no chunk has been acknowledged yet.
    #[sea_orm(string_value = "pending")]
    Pending,

    /// Chunks are in flight.
    #[sea_orm(string_value = "uploading")]
    Uploading,

    /// All six chunks are durable and the digest is recorded.
    ///
    /// Size and checksum are immutable from here on.
    #[sea_orm(string_value = "completed")]
    Completed,

    /// The upload failed; reclamation will remove this row.
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A stored file.
///
/// A completed file always has exactly six completed chunks whose
/// sizes sum to `size`.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "files")]
pub struct Model {
    /// Unique ID of the file.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// The name declared by the uploader.
    pub name: String,

    /// The content type declared by the uploader.
    pub content_type: String,

    /// Declared total size in bytes.
    pub size: i64,

    /// Hex SHA-256 over the whole byte stream.
    ///
    /// Only available once the file is `Completed`.
    pub checksum: Option<String>,

    /// The lifecycle state.
    pub state: FileState,

    /// Timestamp when the file row was created.
    pub created_at: ChronoDateTimeUtc,

    /// Timestamp of the last state change.
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::chunk::Entity")]
    Chunk,

    #[sea_orm(has_many = "super::upload_session::Entity")]
    UploadSession,
}

impl Related<super::chunk::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Chunk.def()
    }
}

impl Related<super::upload_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UploadSession.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
