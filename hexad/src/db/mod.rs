//! The metadata layer.
//!
//! Both daemons are clients of the same relational store: the router
//! owns file, chunk and session metadata, while each chunk server
//! maintains its own registration, ring nodes and heartbeat.

pub mod entity;
pub mod migration;

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::QueryOrder;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveValue::Set, DatabaseConnection, PaginatorTrait, TransactionTrait};
use uuid::Uuid;

use crate::hash::Checksum;
use crate::ring::{virtual_node_hash, VIRTUAL_NODES_PER_SERVER};
use entity::chunk::{self, ChunkModel, ChunkState, Entity as Chunk};
use entity::file::{self, Entity as File, FileModel, FileState};
use entity::ring_node::{self, Entity as RingNode};
use entity::server::{self, Entity as Server, ServerModel, ServerState};
use entity::upload_session::{self, Entity as UploadSession, SessionState, UploadSessionModel};

pub type DbResult<T> = Result<T, DbErr>;

/// Fields of a file about to be created.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub id: Uuid,
    pub name: String,
    pub content_type: String,
    pub size: i64,
}

/// Fields of a chunk whose placement has been acknowledged.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub id: Uuid,
    pub file_id: Uuid,
    pub chunk_index: i32,
    pub server_id: Uuid,
    pub size: i64,
    pub checksum: Checksum,
}

/// Typed operations over the metadata store.
#[async_trait]
pub trait HexadDatabase: Send + Sync {
    /// Creates a pending file and its active upload session in one
    /// transaction.
    async fn create_file_with_session(
        &self,
        new_file: NewFile,
        session_ttl: StdDuration,
    ) -> DbResult<(FileModel, UploadSessionModel)>;

    /// Retrieves a file.
    async fn find_file(&self, id: Uuid) -> DbResult<Option<FileModel>>;

    /// Retrieves a file and its chunks, ordered by chunk index.
    async fn file_with_chunks(&self, id: Uuid) -> DbResult<Option<(FileModel, Vec<ChunkModel>)>>;

    /// Flips a file's lifecycle state. Returns whether the row existed.
    async fn set_file_state(&self, id: Uuid, state: FileState) -> DbResult<bool>;

    /// Records a chunk acknowledged by its server.
    async fn insert_chunk(&self, new_chunk: NewChunk) -> DbResult<ChunkModel>;

    /// Marks a file completed with its digest and completes the
    /// session, in a single transaction.
    async fn finalize_file(
        &self,
        file_id: Uuid,
        session_id: Uuid,
        checksum: &Checksum,
    ) -> DbResult<()>;

    /// Lists files, newest first, with 1-based pagination and an
    /// optional state filter. Returns the page and the total count.
    async fn list_files(
        &self,
        page: u64,
        per_page: u64,
        state: Option<FileState>,
    ) -> DbResult<(Vec<FileModel>, u64)>;

    /// Deletes a file; chunks and sessions cascade. Returns whether the
    /// row existed.
    async fn delete_file(&self, id: Uuid) -> DbResult<bool>;

    /// Registers a chunk server, keyed on its address.
    ///
    /// A server re-registering on a known address keeps its existing id
    /// and has its state, capacity and heartbeat refreshed; otherwise a
    /// row is created under `desired_id`.
    async fn register_server(
        &self,
        desired_id: Uuid,
        address: &str,
        available_bytes: i64,
        used_bytes: i64,
    ) -> DbResult<ServerModel>;

    /// Bumps a server's heartbeat. Returns whether the row existed.
    async fn update_heartbeat(&self, server_id: Uuid) -> DbResult<bool>;

    /// Servers that are `Active` with a heartbeat inside the timeout
    /// window.
    async fn live_servers(&self, heartbeat_timeout: StdDuration) -> DbResult<Vec<ServerModel>>;

    /// Replaces a server's ring nodes so exactly
    /// [`VIRTUAL_NODES_PER_SERVER`] rows exist.
    async fn replace_ring_nodes(&self, server_id: Uuid) -> DbResult<u32>;

    /// Active sessions whose expiration has passed, oldest first.
    async fn expired_sessions(&self) -> DbResult<Vec<UploadSessionModel>>;

    /// Deletes an upload session. Returns whether the row existed.
    async fn delete_session(&self, id: Uuid) -> DbResult<bool>;
}

#[async_trait]
impl HexadDatabase for DatabaseConnection {
    async fn create_file_with_session(
        &self,
        new_file: NewFile,
        session_ttl: StdDuration,
    ) -> DbResult<(FileModel, UploadSessionModel)> {
        let now = Utc::now();
        let ttl = Duration::from_std(session_ttl).map_err(|e| DbErr::Custom(e.to_string()))?;

        let txn = self.begin().await?;

        let file = file::ActiveModel {
            id: Set(new_file.id),
            name: Set(new_file.name),
            content_type: Set(new_file.content_type),
            size: Set(new_file.size),
            checksum: Set(None),
            state: Set(FileState::Pending),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let session = upload_session::ActiveModel {
            id: Set(Uuid::new_v4()),
            file_id: Set(file.id),
            state: Set(SessionState::Active),
            expires_at: Set(now + ttl),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        Ok((file, session))
    }

    async fn find_file(&self, id: Uuid) -> DbResult<Option<FileModel>> {
        File::find_by_id(id).one(self).await
    }

    async fn file_with_chunks(&self, id: Uuid) -> DbResult<Option<(FileModel, Vec<ChunkModel>)>> {
        let file = match File::find_by_id(id).one(self).await? {
            Some(file) => file,
            None => return Ok(None),
        };

        let chunks = Chunk::find()
            .filter(chunk::Column::FileId.eq(id))
            .order_by_asc(chunk::Column::ChunkIndex)
            .all(self)
            .await?;

        Ok(Some((file, chunks)))
    }

    async fn set_file_state(&self, id: Uuid, state: FileState) -> DbResult<bool> {
        let result = File::update_many()
            .col_expr(file::Column::State, Expr::value(state))
            .col_expr(file::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(file::Column::Id.eq(id))
            .exec(self)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn insert_chunk(&self, new_chunk: NewChunk) -> DbResult<ChunkModel> {
        let now = Utc::now();

        chunk::ActiveModel {
            id: Set(new_chunk.id),
            file_id: Set(new_chunk.file_id),
            chunk_index: Set(new_chunk.chunk_index),
            server_id: Set(new_chunk.server_id),
            size: Set(new_chunk.size),
            checksum: Set(new_chunk.checksum.to_hex()),
            state: Set(ChunkState::Completed),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self)
        .await
    }

    async fn finalize_file(
        &self,
        file_id: Uuid,
        session_id: Uuid,
        checksum: &Checksum,
    ) -> DbResult<()> {
        let now = Utc::now();
        let txn = self.begin().await?;

        file::ActiveModel {
            id: Set(file_id),
            state: Set(FileState::Completed),
            checksum: Set(Some(checksum.to_hex())),
            updated_at: Set(now),
            ..Default::default()
        }
        .update(&txn)
        .await?;

        upload_session::ActiveModel {
            id: Set(session_id),
            state: Set(SessionState::Completed),
            updated_at: Set(now),
            ..Default::default()
        }
        .update(&txn)
        .await?;

        txn.commit().await?;

        Ok(())
    }

    async fn list_files(
        &self,
        page: u64,
        per_page: u64,
        state: Option<FileState>,
    ) -> DbResult<(Vec<FileModel>, u64)> {
        let mut query = File::find().order_by_desc(file::Column::CreatedAt);

        if let Some(state) = state {
            query = query.filter(file::Column::State.eq(state));
        }

        let paginator = query.paginate(self, per_page);
        let total = paginator.num_items().await?;
        let files = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((files, total))
    }

    async fn delete_file(&self, id: Uuid) -> DbResult<bool> {
        let result = File::delete_by_id(id).exec(self).await?;
        Ok(result.rows_affected > 0)
    }

    async fn register_server(
        &self,
        desired_id: Uuid,
        address: &str,
        available_bytes: i64,
        used_bytes: i64,
    ) -> DbResult<ServerModel> {
        let now = Utc::now();
        let txn = self.begin().await?;

        let existing = Server::find()
            .filter(server::Column::Address.eq(address))
            .one(&txn)
            .await?;

        let model = match existing {
            Some(existing) => {
                let mut refresh: server::ActiveModel = existing.into();
                refresh.state = Set(ServerState::Active);
                refresh.available_bytes = Set(available_bytes);
                refresh.used_bytes = Set(used_bytes);
                refresh.last_heartbeat = Set(now);
                refresh.updated_at = Set(now);
                refresh.update(&txn).await?
            }
            None => {
                server::ActiveModel {
                    id: Set(desired_id),
                    address: Set(address.to_owned()),
                    state: Set(ServerState::Active),
                    available_bytes: Set(available_bytes),
                    used_bytes: Set(used_bytes),
                    last_heartbeat: Set(now),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };

        txn.commit().await?;

        Ok(model)
    }

    async fn update_heartbeat(&self, server_id: Uuid) -> DbResult<bool> {
        let result = Server::update_many()
            .col_expr(server::Column::LastHeartbeat, Expr::value(Utc::now()))
            .filter(server::Column::Id.eq(server_id))
            .exec(self)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn live_servers(&self, heartbeat_timeout: StdDuration) -> DbResult<Vec<ServerModel>> {
        let timeout =
            Duration::from_std(heartbeat_timeout).map_err(|e| DbErr::Custom(e.to_string()))?;
        let cutoff = Utc::now() - timeout;

        Server::find()
            .filter(server::Column::State.eq(ServerState::Active))
            .filter(server::Column::LastHeartbeat.gt(cutoff))
            .order_by_asc(server::Column::Id)
            .all(self)
            .await
    }

    async fn replace_ring_nodes(&self, server_id: Uuid) -> DbResult<u32> {
        let txn = self.begin().await?;

        // A server restarting under the same identity must end up with
        // exactly one full set of nodes.
        RingNode::delete_many()
            .filter(ring_node::Column::ServerId.eq(server_id))
            .exec(&txn)
            .await?;

        let nodes: Vec<ring_node::ActiveModel> = (0..VIRTUAL_NODES_PER_SERVER)
            .map(|virtual_index| ring_node::ActiveModel {
                server_id: Set(server_id),
                virtual_index: Set(virtual_index as i32),
                hash_value: Set(virtual_node_hash(server_id, virtual_index) as i64),
                ..Default::default()
            })
            .collect();

        RingNode::insert_many(nodes).exec(&txn).await?;

        txn.commit().await?;

        Ok(VIRTUAL_NODES_PER_SERVER)
    }

    async fn expired_sessions(&self) -> DbResult<Vec<UploadSessionModel>> {
        UploadSession::find()
            .filter(upload_session::Column::State.eq(SessionState::Active))
            .filter(upload_session::Column::ExpiresAt.lt(Utc::now()))
            .order_by_asc(upload_session::Column::ExpiresAt)
            .all(self)
            .await
    }

    async fn delete_session(&self, id: Uuid) -> DbResult<bool> {
        let result = UploadSession::delete_by_id(id).exec(self).await?;
        Ok(result.rows_affected > 0)
    }
}
