//! A registered chunk server.

use sea_orm::entity::prelude::*;

pub type ServerModel = Model;

/// The administrative state of a chunk server.
#[derive(EnumIter, DeriveActiveEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum ServerState {
    /// The server takes traffic while its heartbeat is fresh.
    #[sea_orm(string_value = "active")]
    Active,

    /// The server is administratively withdrawn.
    #[sea_orm(string_value = "inactive")]
    Inactive,

    /// The server is up for maintenance and takes no new placements.
    #[sea_orm(string_value = "maintenance")]
    Maintenance,
}

/// A registered chunk server.
///
/// A server is considered live iff its state is `Active` and its last
/// heartbeat is within the heartbeat timeout. Liveness decides ring
/// membership only; chunks already placed on a server stay bound to it.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "storage_servers")]
pub struct Model {
    /// Unique ID of the server.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Network address (`host:port`) the chunk service listens on.
    ///
    /// Registration is keyed on this: a server restarting on the same
    /// address keeps its identity.
    #[sea_orm(unique)]
    pub address: String,

    /// The administrative state.
    pub state: ServerState,

    /// Self-reported free bytes in the data directory.
    pub available_bytes: i64,

    /// Self-reported used bytes in the data directory.
    pub used_bytes: i64,

    /// Timestamp of the last heartbeat.
    #[sea_orm(indexed)]
    pub last_heartbeat: ChronoDateTimeUtc,

    /// Timestamp when the server first registered.
    pub created_at: ChronoDateTimeUtc,

    /// Timestamp of the last registration refresh.
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::ring_node::Entity")]
    RingNode,

    #[sea_orm(has_many = "super::chunk::Entity")]
    Chunk,
}

impl Related<super::ring_node::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RingNode.def()
    }
}

impl Related<super::chunk::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Chunk.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
