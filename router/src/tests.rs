//! End-to-end coordination tests.
//!
//! A real metadata store (SQLite), real chunk services on loopback
//! TCP, and requests driven through the HTTP router. These exercise
//! the whole coordination plane: placement, the upload and download
//! state machines, the fault shell and reclamation.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::DefaultBodyLimit;
use axum::http::{header, Request, StatusCode};
use axum::{extract::Extension, Router};
use sea_orm::DatabaseConnection;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

use crate::config::Config;
use crate::{api, reclamation, State, StateInner};
use hexad::db::entity::file::FileState;
use hexad::db::migration::{Migrator, MigratorTrait};
use hexad::db::HexadDatabase;
use hexad::hash::Checksum;
use hexad::testing::get_fake_data;
use hexad_chunkd::service;
use hexad_chunkd::store::ChunkStore;

const BOUNDARY: &str = "hexad-test-boundary";

struct TestServer {
    token: CancellationToken,
    _dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct TestCluster {
    state: State,
    app: Router,
    servers: Vec<TestServer>,
    _meta_dir: TempDir,
}

impl TestCluster {
    /// Brings up a metadata store, `n` chunk servers and the router.
    async fn start(n: usize) -> Self {
        let meta_dir = TempDir::new().unwrap();
        let database_url = format!(
            "sqlite://{}?mode=rwc",
            meta_dir.path().join("meta.db").display()
        );

        let state = StateInner::new(Config {
            listen: "127.0.0.1:0".parse().unwrap(),
            database_url,
        })
        .await;

        {
            let db = state.database().await.unwrap();
            Migrator::up(db, None).await.unwrap();
        }

        let mut cluster = Self {
            app: Router::new()
                .merge(api::get_router())
                .layer(DefaultBodyLimit::disable())
                .layer(Extension(state.clone())),
            state,
            servers: Vec::new(),
            _meta_dir: meta_dir,
        };

        for _ in 0..n {
            cluster.add_server().await;
        }
        cluster.refresh().await;

        cluster
    }

    async fn db(&self) -> DatabaseConnection {
        self.state.database().await.unwrap().clone()
    }

    /// Starts one chunk service and registers it.
    async fn add_server(&mut self) {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(ChunkStore::new(dir.path()).await.unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let token = CancellationToken::new();
        tokio::spawn(service::serve(listener, store, token.clone()));

        let db = self.state.database().await.unwrap();
        let server = db
            .register_server(Uuid::new_v4(), &address, 1 << 40, 0)
            .await
            .unwrap();
        db.replace_ring_nodes(server.id).await.unwrap();

        self.servers.push(TestServer { token, _dir: dir });
    }

    async fn refresh(&self) {
        let db = self.state.database().await.unwrap();
        self.state.cluster.refresh(db).await.unwrap();
    }

    async fn request(&self, request: Request<Body>) -> (StatusCode, bytes::Bytes) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body)
    }

    async fn upload(&self, filename: &str, data: &[u8]) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/files")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(filename, data)))
            .unwrap();

        let (status, body) = self.request(request).await;
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn download(&self, file_id: &str) -> (StatusCode, bytes::Bytes) {
        let request = Request::builder()
            .uri(format!("/files/{}", file_id))
            .body(Body::empty())
            .unwrap();
        self.request(request).await
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = self.request(request).await;
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}

fn multipart_body(filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

#[tokio::test]
async fn test_upload_download_round_trip() {
    let cluster = TestCluster::start(6).await;
    let data = get_fake_data(1_000_003);

    let (status, json) = cluster.upload("payload.bin", &data).await;
    assert_eq!(status, StatusCode::CREATED, "upload failed: {}", json);
    assert_eq!(json["chunks"], 6);
    assert_eq!(json["size"], data.len() as u64);
    assert_eq!(json["status"], "completed");
    assert_eq!(
        json["checksum"],
        Checksum::sha256_from_bytes(&data).to_hex()
    );

    let file_id = json["file_id"].as_str().unwrap().to_string();

    // Metadata agrees with the contract: six completed chunks, sizes
    // within one byte, summing to the total.
    let (status, meta) = cluster
        .get_json(&format!("/files/{}/metadata", file_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    let chunks = meta["chunks"].as_array().unwrap();
    assert_eq!(chunks.len(), 6);
    let sizes: Vec<u64> = chunks.iter().map(|c| c["size"].as_u64().unwrap()).collect();
    assert_eq!(sizes.iter().sum::<u64>(), data.len() as u64);
    assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);

    // The downloaded bytes are identical.
    let (status, body) = cluster.download(&file_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], &data[..]);
}

#[tokio::test]
async fn test_small_file_round_trip() {
    let cluster = TestCluster::start(6).await;

    // Two bytes still produce six chunk records, four of them empty.
    let (status, json) = cluster.upload("tiny", b"hi").await;
    assert_eq!(status, StatusCode::CREATED, "upload failed: {}", json);
    assert_eq!(json["chunks"], 6);

    let file_id = json["file_id"].as_str().unwrap().to_string();
    let (status, body) = cluster.download(&file_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"hi");
}

#[tokio::test]
async fn test_upload_without_servers_is_rejected() {
    let cluster = TestCluster::start(0).await;

    let (status, _) = cluster.upload("nowhere.bin", b"some data").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_empty_upload_is_rejected() {
    let cluster = TestCluster::start(6).await;

    let (status, _) = cluster.upload("empty", b"").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Nothing was recorded.
    let (_, listing) = cluster.get_json("/files").await;
    assert_eq!(listing["pagination"]["total_count"], 0);
}

#[tokio::test]
async fn test_download_of_unfinished_file_conflicts() {
    let cluster = TestCluster::start(6).await;
    let db = cluster.db().await;

    let (file, _) = db
        .create_file_with_session(
            hexad::db::NewFile {
                id: Uuid::new_v4(),
                name: "stuck.bin".to_string(),
                content_type: "application/octet-stream".to_string(),
                size: 100,
            },
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

    let (status, _) = cluster.download(&file.id.to_string()).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_missing_and_malformed_ids() {
    let cluster = TestCluster::start(6).await;

    let (status, _) = cluster.download(&Uuid::new_v4().to_string()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = cluster.download("not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_removes_chunks_and_metadata() {
    let cluster = TestCluster::start(6).await;
    let data = get_fake_data(50_000);

    let (_, json) = cluster.upload("doomed.bin", &data).await;
    let file_id = json["file_id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/files/{}", file_id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = cluster.request(request).await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["deleted_chunks"], 6);
    assert_eq!(json["failed_chunks"], 0);

    let (status, _) = cluster.download(&file_id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_expired_session_is_reclaimed() {
    let cluster = TestCluster::start(6).await;
    let db = cluster.db().await;

    // An upload that died after placing one chunk: the session is
    // already past its expiration.
    let (file, _session) = db
        .create_file_with_session(
            hexad::db::NewFile {
                id: Uuid::new_v4(),
                name: "interrupted.bin".to_string(),
                content_type: "application/octet-stream".to_string(),
                size: 64,
            },
            Duration::from_secs(0),
        )
        .await
        .unwrap();

    let data = get_fake_data(64);
    let chunk_id = Uuid::new_v4();
    let server_id = cluster
        .state
        .cluster
        .lookup(&chunk_id.to_string())
        .unwrap();
    let client = cluster.state.cluster.client(server_id).unwrap();
    client
        .put_chunk(chunk_id, Checksum::sha256_from_bytes(&data), &data[..])
        .await
        .unwrap();
    db.insert_chunk(hexad::db::NewChunk {
        id: chunk_id,
        file_id: file.id,
        chunk_index: 0,
        server_id,
        size: data.len() as i64,
        checksum: Checksum::sha256_from_bytes(&data),
    })
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    reclamation::run_reclamation_once(&cluster.state).await.unwrap();

    // Session, file, chunk rows and the chunk file itself are gone.
    assert!(db.expired_sessions().await.unwrap().is_empty());
    assert!(db.find_file(file.id).await.unwrap().is_none());
    assert!(!client.delete_chunk(chunk_id).await.unwrap());

    // A second pass over nothing is harmless.
    reclamation::run_reclamation_once(&cluster.state).await.unwrap();
}

#[tokio::test]
async fn test_adding_a_server_does_not_move_existing_chunks() {
    let mut cluster = TestCluster::start(3).await;
    let db = cluster.db().await;

    let mut uploaded = Vec::new();
    for i in 0..8 {
        let data = get_fake_data(10_000 + i);
        let (status, json) = cluster.upload(&format!("file-{}.bin", i), &data).await;
        assert_eq!(status, StatusCode::CREATED);
        let file_id: Uuid = json["file_id"].as_str().unwrap().parse().unwrap();

        let (_, chunks) = db.file_with_chunks(file_id).await.unwrap().unwrap();
        let placement: Vec<(Uuid, Uuid)> = chunks.iter().map(|c| (c.id, c.server_id)).collect();
        uploaded.push((file_id, data, placement));
    }

    cluster.add_server().await;
    cluster.refresh().await;

    for i in 8..12 {
        let data = get_fake_data(10_000 + i);
        let (status, _) = cluster.upload(&format!("file-{}.bin", i), &data).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    // Chunk locations persisted before the topology change are
    // immutable and the files still read back intact.
    for (file_id, data, placement) in &uploaded {
        let (_, chunks) = db.file_with_chunks(*file_id).await.unwrap().unwrap();
        let now: Vec<(Uuid, Uuid)> = chunks.iter().map(|c| (c.id, c.server_id)).collect();
        assert_eq!(&now, placement);

        let (status, body) = cluster.download(&file_id.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], &data[..]);
    }
}

#[tokio::test]
async fn test_health_reports_live_servers() {
    let cluster = TestCluster::start(4).await;

    let (status, json) = cluster.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["storage_servers"], 4);
    assert_eq!(cluster.servers.len(), 4);
}

#[tokio::test]
async fn test_listing_filters_by_state() {
    let cluster = TestCluster::start(6).await;
    let db = cluster.db().await;

    cluster.upload("done.bin", b"finished upload").await;

    // One file left pending by hand.
    db.create_file_with_session(
        hexad::db::NewFile {
            id: Uuid::new_v4(),
            name: "limbo.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            size: 1,
        },
        Duration::from_secs(3600),
    )
    .await
    .unwrap();

    let (_, listing) = cluster.get_json("/files").await;
    assert_eq!(listing["pagination"]["total_count"], 2);

    let (_, listing) = cluster.get_json("/files?status=completed").await;
    assert_eq!(listing["pagination"]["total_count"], 1);
    assert_eq!(listing["files"][0]["filename"], "done.bin");

    let (status, _) = cluster.get_json("/files?status=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Confirm the pending file is what the filter says it is.
    let (_, listing) = cluster.get_json("/files?status=pending").await;
    assert_eq!(listing["files"][0]["status"], FileState::Pending.as_str());
}
