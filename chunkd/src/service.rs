//! The chunk service.
//!
//! Serves the framed protocol over TCP: one connection carries one
//! exchange at a time. A store exchange is consumed to its end frame
//! even after an early failure, so a sender streaming a large chunk is
//! never left blocked on a full socket while the server already knows
//! the outcome.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::store::{ChunkStore, StoreError};
use hexad::hash::Checksum;
use hexad::proto::{
    read_frame, write_frame, HealthReport, ProtoError, Request, Response, Status, DATA_FRAME_SIZE,
};

type Conn = BufStream<TcpStream>;

/// Accepts connections until cancelled.
pub async fn serve(listener: TcpListener, store: Arc<ChunkStore>, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let store = store.clone();
                    tokio::spawn(async move {
                        if let Err(error) = handle_connection(stream, store).await {
                            tracing::debug!("connection from {} ended: {}", peer, error);
                        }
                    });
                }
                Err(error) => tracing::warn!("accept failed: {}", error),
            }
        }
    }

    tracing::info!("chunk service stopped");
}

async fn handle_connection(stream: TcpStream, store: Arc<ChunkStore>) -> Result<(), ProtoError> {
    let _ = stream.set_nodelay(true);
    let mut conn = BufStream::new(stream);

    loop {
        let request = match read_frame::<_, Request>(&mut conn).await {
            Ok(request) => request,
            // Peer closed between exchanges.
            Err(ProtoError::Io(error)) if error.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        match request {
            Request::PutBegin { chunk_id, checksum } => {
                handle_put(&mut conn, &store, chunk_id, checksum).await?;
            }
            Request::Get { chunk_id } => handle_get(&mut conn, &store, chunk_id).await?,
            Request::Delete { chunk_id } => handle_delete(&mut conn, &store, chunk_id).await?,
            Request::Health => handle_health(&mut conn, &store).await?,
            Request::PutData { .. } | Request::PutEnd => {
                // Frame sequencing is broken; the connection state is
                // unknowable from here.
                write_frame(
                    &mut conn,
                    &Response::Error {
                        status: Status::InvalidArgument,
                        message: "data frame outside a store exchange".to_string(),
                    },
                )
                .await?;
                return Ok(());
            }
        }
    }
}

fn error_reply(error: &StoreError) -> Response {
    Response::Error {
        status: error.status(),
        message: error.to_string(),
    }
}

#[instrument(skip_all, fields(chunk_id = %chunk_id))]
async fn handle_put(
    conn: &mut Conn,
    store: &ChunkStore,
    chunk_id: Uuid,
    checksum: Checksum,
) -> Result<(), ProtoError> {
    let (mut writer, mut failure) = match store.begin_put(chunk_id).await {
        Ok(writer) => (Some(writer), None),
        Err(error) => (None, Some(error)),
    };

    loop {
        match read_frame::<_, Request>(conn).await? {
            Request::PutData { data } => {
                if failure.is_none() {
                    if let Some(writer) = writer.as_mut() {
                        if let Err(error) = writer.write(&data).await {
                            failure = Some(error);
                        }
                    }
                }
            }
            Request::PutEnd => break,
            _ => {
                if let Some(writer) = writer.take() {
                    writer.abort().await;
                }
                write_frame(
                    conn,
                    &Response::Error {
                        status: Status::InvalidArgument,
                        message: "unexpected frame in store exchange".to_string(),
                    },
                )
                .await?;
                return Err(ProtoError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "store exchange out of sequence",
                )));
            }
        }
    }

    if let Some(error) = failure {
        if let Some(writer) = writer.take() {
            writer.abort().await;
        }
        tracing::warn!("store exchange for chunk {} failed: {}", chunk_id, error);
        return write_frame(conn, &error_reply(&error)).await;
    }

    let writer = writer.expect("writer exists when no failure was recorded");
    let received = writer.bytes_written();

    match writer.commit(&checksum).await {
        Ok(size) => {
            tracing::debug!("chunk {} stored ({} bytes)", chunk_id, size);
            write_frame(conn, &Response::PutAck { chunk_id, size }).await
        }
        Err(error) => {
            tracing::warn!(
                "chunk {} rejected after {} bytes: {}",
                chunk_id,
                received,
                error
            );
            write_frame(conn, &error_reply(&error)).await
        }
    }
}

#[instrument(skip_all, fields(chunk_id = %chunk_id))]
async fn handle_get(
    conn: &mut Conn,
    store: &ChunkStore,
    chunk_id: Uuid,
) -> Result<(), ProtoError> {
    let (mut file, size) = match store.open(chunk_id).await {
        Ok(opened) => opened,
        Err(error) => {
            if !matches!(error, StoreError::NotFound) {
                tracing::warn!("refusing to serve chunk {}: {}", chunk_id, error);
            }
            return write_frame(conn, &error_reply(&error)).await;
        }
    };

    let mut buf = vec![0u8; DATA_FRAME_SIZE];
    loop {
        let read = match file.read(&mut buf).await {
            Ok(read) => read,
            Err(error) => {
                tracing::warn!("read of chunk {} failed midway: {}", chunk_id, error);
                return write_frame(
                    conn,
                    &Response::Error {
                        status: Status::Internal,
                        message: error.to_string(),
                    },
                )
                .await;
            }
        };

        if read == 0 {
            break;
        }

        write_frame(
            conn,
            &Response::Data {
                data: buf[..read].to_vec(),
            },
        )
        .await?;
    }

    write_frame(conn, &Response::End).await?;
    tracing::debug!("chunk {} served ({} bytes)", chunk_id, size);

    Ok(())
}

#[instrument(skip_all, fields(chunk_id = %chunk_id))]
async fn handle_delete(
    conn: &mut Conn,
    store: &ChunkStore,
    chunk_id: Uuid,
) -> Result<(), ProtoError> {
    match store.delete(chunk_id).await {
        Ok(()) => {
            tracing::debug!("chunk {} deleted", chunk_id);
            write_frame(conn, &Response::DeleteAck { chunk_id }).await
        }
        Err(error) => write_frame(conn, &error_reply(&error)).await,
    }
}

#[instrument(skip_all)]
async fn handle_health(conn: &mut Conn, store: &ChunkStore) -> Result<(), ProtoError> {
    let report = match store.usage() {
        Ok(report) => report,
        Err(error) => {
            tracing::warn!("disk usage probe failed: {}", error);
            HealthReport {
                healthy: false,
                available: 0,
                used: 0,
                total: 0,
            }
        }
    };

    write_frame(conn, &Response::Health(report)).await
}
