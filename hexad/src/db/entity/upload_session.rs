//! A time-bounded upload session.

use sea_orm::entity::prelude::*;

pub type UploadSessionModel = Model;

/// The lifecycle state of an upload session.
#[derive(EnumIter, DeriveActiveEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum SessionState {
    /// The upload is (or may still be) in progress.
    ///
    /// An active session past its expiration is the reclamation
    /// worker's cue to sweep the file and its chunks.
    #[sea_orm(string_value = "active")]
    Active,

    /// The upload finalized successfully.
    #[sea_orm(string_value = "completed")]
    Completed,

    /// The session aged out and was reclaimed.
    #[sea_orm(string_value = "expired")]
    Expired,

    /// The client abandoned the upload deliberately.
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// A time-bounded record tracking an in-progress upload.
///
/// At most one active session exists per file; the session outlives a
/// router crash, which is what makes abandoned uploads reclaimable.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "upload_sessions")]
pub struct Model {
    /// Unique ID of the session.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// The file this session tracks.
    pub file_id: Uuid,

    /// The lifecycle state.
    pub state: SessionState,

    /// When the session stops being trusted and becomes sweepable.
    #[sea_orm(indexed)]
    pub expires_at: ChronoDateTimeUtc,

    /// Timestamp when the session was created.
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
}

impl Related<super::file::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::File.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
