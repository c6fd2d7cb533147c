//! Metadata layer tests against SQLite.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectOptions, Database, DatabaseConnection};
use uuid::Uuid;

use hexad::db::entity::chunk::Entity as Chunk;
use hexad::db::entity::file::FileState;
use hexad::db::entity::server;
use hexad::db::entity::upload_session::Entity as UploadSession;
use hexad::db::migration::{Migrator, MigratorTrait};
use hexad::db::{HexadDatabase, NewChunk, NewFile};
use hexad::hash::Checksum;
use hexad::ring::VIRTUAL_NODES_PER_SERVER;

const SESSION_TTL: Duration = Duration::from_secs(3600);

async fn connect() -> DatabaseConnection {
    // In-memory SQLite lives and dies with its connection; a pool of
    // one keeps every query on the same database.
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);

    let db = Database::connect(options).await.expect("connect");
    Migrator::up(&db, None).await.expect("migrations");
    db
}

fn new_file(size: i64) -> NewFile {
    NewFile {
        id: Uuid::new_v4(),
        name: "report.pdf".to_string(),
        content_type: "application/pdf".to_string(),
        size,
    }
}

#[tokio::test]
async fn test_create_file_with_session() {
    let db = connect().await;

    let (file, session) = db
        .create_file_with_session(new_file(1024), SESSION_TTL)
        .await
        .unwrap();

    assert_eq!(file.state, FileState::Pending);
    assert!(file.checksum.is_none());
    assert_eq!(session.file_id, file.id);
    assert!(session.expires_at > Utc::now());

    let found = db.find_file(file.id).await.unwrap().unwrap();
    assert_eq!(found.size, 1024);
}

#[tokio::test]
async fn test_finalize_file() {
    let db = connect().await;

    let (file, session) = db
        .create_file_with_session(new_file(6), SESSION_TTL)
        .await
        .unwrap();

    let checksum = Checksum::sha256_from_bytes(b"abcdef");
    db.finalize_file(file.id, session.id, &checksum)
        .await
        .unwrap();

    let found = db.find_file(file.id).await.unwrap().unwrap();
    assert_eq!(found.state, FileState::Completed);
    assert_eq!(found.checksum.as_deref(), Some(checksum.to_hex().as_str()));
}

#[tokio::test]
async fn test_chunks_ordered_by_index() {
    let db = connect().await;

    let server = db
        .register_server(Uuid::new_v4(), "chunkd-0:50051", 1 << 40, 0)
        .await
        .unwrap();
    let (file, _) = db
        .create_file_with_session(new_file(60), SESSION_TTL)
        .await
        .unwrap();

    // Insert out of order on purpose.
    for index in [3, 0, 5, 1, 4, 2] {
        db.insert_chunk(NewChunk {
            id: Uuid::new_v4(),
            file_id: file.id,
            chunk_index: index,
            server_id: server.id,
            size: 10,
            checksum: Checksum::sha256_from_bytes(&[index as u8]),
        })
        .await
        .unwrap();
    }

    let (_, chunks) = db.file_with_chunks(file.id).await.unwrap().unwrap();
    let indexes: Vec<i32> = chunks.iter().map(|c| c.chunk_index).collect();
    assert_eq!(indexes, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_delete_file_cascades() {
    let db = connect().await;

    let server = db
        .register_server(Uuid::new_v4(), "chunkd-0:50051", 1 << 40, 0)
        .await
        .unwrap();
    let (file, _) = db
        .create_file_with_session(new_file(10), SESSION_TTL)
        .await
        .unwrap();

    db.insert_chunk(NewChunk {
        id: Uuid::new_v4(),
        file_id: file.id,
        chunk_index: 0,
        server_id: server.id,
        size: 10,
        checksum: Checksum::sha256_from_bytes(b"x"),
    })
    .await
    .unwrap();

    assert!(db.delete_file(file.id).await.unwrap());
    assert!(db.find_file(file.id).await.unwrap().is_none());

    let chunks = Chunk::find().all(&db).await.unwrap();
    assert!(chunks.is_empty(), "chunk rows must cascade");

    let sessions = UploadSession::find().all(&db).await.unwrap();
    assert!(sessions.is_empty(), "session rows must cascade");
}

#[tokio::test]
async fn test_register_server_is_keyed_on_address() {
    let db = connect().await;

    let first = db
        .register_server(Uuid::new_v4(), "chunkd-0:50051", 100, 0)
        .await
        .unwrap();

    // Same address, different desired id: the row keeps its identity.
    let second = db
        .register_server(Uuid::new_v4(), "chunkd-0:50051", 50, 50)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.available_bytes, 50);

    let third = db
        .register_server(Uuid::new_v4(), "chunkd-1:50051", 100, 0)
        .await
        .unwrap();
    assert_ne!(first.id, third.id);
}

#[tokio::test]
async fn test_live_servers_cutoff() {
    let db = connect().await;

    let fresh = db
        .register_server(Uuid::new_v4(), "chunkd-0:50051", 100, 0)
        .await
        .unwrap();
    let stale = db
        .register_server(Uuid::new_v4(), "chunkd-1:50051", 100, 0)
        .await
        .unwrap();

    // Age the second server's heartbeat past the window.
    let mut aged: server::ActiveModel = stale.into();
    aged.last_heartbeat = Set(Utc::now() - ChronoDuration::seconds(60));
    aged.update(&db).await.unwrap();

    let live = db.live_servers(Duration::from_secs(30)).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, fresh.id);

    assert!(db.update_heartbeat(live[0].id).await.unwrap());
    assert!(!db.update_heartbeat(Uuid::new_v4()).await.unwrap());
}

#[tokio::test]
async fn test_replace_ring_nodes() {
    let db = connect().await;

    let server = db
        .register_server(Uuid::new_v4(), "chunkd-0:50051", 100, 0)
        .await
        .unwrap();

    db.replace_ring_nodes(server.id).await.unwrap();
    // A restart replaces rather than accumulates.
    db.replace_ring_nodes(server.id).await.unwrap();

    let count = hexad::db::entity::ring_node::Entity::find()
        .count(&db)
        .await
        .unwrap();
    assert_eq!(count, VIRTUAL_NODES_PER_SERVER as u64);
}

#[tokio::test]
async fn test_expired_sessions() {
    let db = connect().await;

    let (_, expired) = db
        .create_file_with_session(new_file(1), Duration::from_secs(0))
        .await
        .unwrap();
    let (_, _live) = db
        .create_file_with_session(new_file(1), SESSION_TTL)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    let sessions = db.expired_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, expired.id);

    assert!(db.delete_session(expired.id).await.unwrap());
    assert!(!db.delete_session(expired.id).await.unwrap());
}

#[tokio::test]
async fn test_list_files_pagination() {
    let db = connect().await;

    for _ in 0..5 {
        db.create_file_with_session(new_file(1), SESSION_TTL)
            .await
            .unwrap();
    }

    let (completed_file, session) = db
        .create_file_with_session(new_file(1), SESSION_TTL)
        .await
        .unwrap();
    db.finalize_file(
        completed_file.id,
        session.id,
        &Checksum::sha256_from_bytes(b"z"),
    )
    .await
    .unwrap();

    let (page, total) = db.list_files(1, 4, None).await.unwrap();
    assert_eq!(total, 6);
    assert_eq!(page.len(), 4);

    let (page, total) = db.list_files(2, 4, None).await.unwrap();
    assert_eq!(total, 6);
    assert_eq!(page.len(), 2);

    let (page, total) = db
        .list_files(1, 10, Some(FileState::Completed))
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(page[0].id, completed_file.id);
}
