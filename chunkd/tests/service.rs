//! Chunk service tests over a real socket.

use std::sync::Arc;

use tokio::io::BufStream;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hexad::hash::Checksum;
use hexad::proto::{read_frame, write_frame, Request, Response, Status};
use hexad::testing::get_fake_data;
use hexad_chunkd::service;
use hexad_chunkd::store::ChunkStore;

struct TestService {
    address: String,
    token: CancellationToken,
    _dir: tempfile::TempDir,
}

impl TestService {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ChunkStore::new(dir.path()).await.unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let token = CancellationToken::new();
        tokio::spawn(service::serve(listener, store, token.clone()));

        Self {
            address,
            token,
            _dir: dir,
        }
    }

    async fn connect(&self) -> BufStream<TcpStream> {
        BufStream::new(TcpStream::connect(&self.address).await.unwrap())
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn send(conn: &mut BufStream<TcpStream>, frame: &Request) {
    write_frame(conn, frame).await.unwrap();
}

async fn recv(conn: &mut BufStream<TcpStream>) -> Response {
    read_frame(conn).await.unwrap()
}

/// Stores a chunk over the wire, 64 KiB frames at a time.
async fn put_chunk(conn: &mut BufStream<TcpStream>, chunk_id: Uuid, data: &[u8]) -> Response {
    send(
        conn,
        &Request::PutBegin {
            chunk_id,
            checksum: Checksum::sha256_from_bytes(data),
        },
    )
    .await;

    for piece in data.chunks(64 * 1024) {
        send(
            conn,
            &Request::PutData {
                data: piece.to_vec(),
            },
        )
        .await;
    }

    send(conn, &Request::PutEnd).await;
    recv(conn).await
}

/// Fetches a chunk over the wire, reassembling the data frames.
async fn get_chunk(conn: &mut BufStream<TcpStream>, chunk_id: Uuid) -> Result<Vec<u8>, Response> {
    send(conn, &Request::Get { chunk_id }).await;

    let mut data = Vec::new();
    loop {
        match recv(conn).await {
            Response::Data { data: piece } => data.extend(piece),
            Response::End => return Ok(data),
            other => return Err(other),
        }
    }
}

#[tokio::test]
async fn test_put_then_get() {
    let service = TestService::start().await;
    let mut conn = service.connect().await;

    let chunk_id = Uuid::new_v4();
    let data = get_fake_data(200_000);

    match put_chunk(&mut conn, chunk_id, &data).await {
        Response::PutAck {
            chunk_id: acked,
            size,
        } => {
            assert_eq!(acked, chunk_id);
            assert_eq!(size, data.len() as u64);
        }
        other => panic!("unexpected reply: {:?}", other),
    }

    assert_eq!(get_chunk(&mut conn, chunk_id).await.unwrap(), data);
}

#[tokio::test]
async fn test_exchanges_share_a_connection() {
    let service = TestService::start().await;
    let mut conn = service.connect().await;

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    put_chunk(&mut conn, first, b"first chunk").await;
    put_chunk(&mut conn, second, b"second chunk").await;

    assert_eq!(get_chunk(&mut conn, first).await.unwrap(), b"first chunk");
    assert_eq!(get_chunk(&mut conn, second).await.unwrap(), b"second chunk");
}

#[tokio::test]
async fn test_put_with_wrong_checksum_is_rejected() {
    let service = TestService::start().await;
    let mut conn = service.connect().await;

    let chunk_id = Uuid::new_v4();

    send(
        &mut conn,
        &Request::PutBegin {
            chunk_id,
            checksum: Checksum::sha256_from_bytes(b"what was promised"),
        },
    )
    .await;
    send(
        &mut conn,
        &Request::PutData {
            data: b"what actually arrived".to_vec(),
        },
    )
    .await;
    send(&mut conn, &Request::PutEnd).await;

    match recv(&mut conn).await {
        Response::Error { status, .. } => assert_eq!(status, Status::DataLoss),
        other => panic!("unexpected reply: {:?}", other),
    }

    // Nothing was stored.
    match get_chunk(&mut conn, chunk_id).await {
        Err(Response::Error { status, .. }) => assert_eq!(status, Status::NotFound),
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_chunk_has_no_data_frames() {
    let service = TestService::start().await;
    let mut conn = service.connect().await;

    let chunk_id = Uuid::new_v4();

    send(
        &mut conn,
        &Request::PutBegin {
            chunk_id,
            checksum: Checksum::sha256_from_bytes(b""),
        },
    )
    .await;
    send(&mut conn, &Request::PutEnd).await;

    match recv(&mut conn).await {
        Response::PutAck { size, .. } => assert_eq!(size, 0),
        other => panic!("unexpected reply: {:?}", other),
    }

    assert_eq!(get_chunk(&mut conn, chunk_id).await.unwrap(), b"");
}

#[tokio::test]
async fn test_get_missing_chunk() {
    let service = TestService::start().await;
    let mut conn = service.connect().await;

    match get_chunk(&mut conn, Uuid::new_v4()).await {
        Err(Response::Error { status, .. }) => assert_eq!(status, Status::NotFound),
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[tokio::test]
async fn test_delete() {
    let service = TestService::start().await;
    let mut conn = service.connect().await;

    let chunk_id = Uuid::new_v4();
    put_chunk(&mut conn, chunk_id, b"short-lived").await;

    send(&mut conn, &Request::Delete { chunk_id }).await;
    match recv(&mut conn).await {
        Response::DeleteAck { chunk_id: acked } => assert_eq!(acked, chunk_id),
        other => panic!("unexpected reply: {:?}", other),
    }

    // A repeated delete reports the absence.
    send(&mut conn, &Request::Delete { chunk_id }).await;
    match recv(&mut conn).await {
        Response::Error { status, .. } => assert_eq!(status, Status::NotFound),
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[tokio::test]
async fn test_health_report() {
    let service = TestService::start().await;
    let mut conn = service.connect().await;

    send(&mut conn, &Request::Health).await;
    match recv(&mut conn).await {
        Response::Health(report) => {
            assert!(report.healthy);
            assert!(report.total > 0);
            assert!(report.available <= report.total);
        }
        other => panic!("unexpected reply: {:?}", other),
    }
}
