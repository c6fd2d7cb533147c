//! A virtual node on the placement ring.

use sea_orm::entity::prelude::*;

pub type RingNodeModel = Model;

/// A virtual node on the placement ring.
///
/// Each registered server owns exactly
/// [`crate::ring::VIRTUAL_NODES_PER_SERVER`] rows, recreated in full
/// whenever the server registers. The hash value is deterministic in
/// `(server_id, virtual_index)`; the column exists so the durable view
/// of the ring can be audited, the router recomputes positions from
/// the same function.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "ring_nodes")]
pub struct Model {
    /// Unique numeric ID of the ring node.
    #[sea_orm(primary_key)]
    pub id: i64,

    /// The owning server.
    pub server_id: Uuid,

    /// Index of this virtual node, 0 through 149.
    ///
    /// `(server_id, virtual_index)` is unique.
    pub virtual_index: i32,

    /// XXH64 position on the ring, stored as a signed 64-bit value.
    #[sea_orm(indexed)]
    pub hash_value: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::server::Entity",
        from = "Column::ServerId",
        to = "super::server::Column::Id",
        on_delete = "Cascade"
    )]
    Server,
}

impl Related<super::server::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Server.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
