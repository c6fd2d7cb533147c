//! The download coordinator.
//!
//! Chunks are streamed back strictly in index order. While one chunk
//! drains to the client, the transfers for the next chunks are already
//! being opened, so the body stays smooth across chunk boundaries
//! without holding all six server connections at once.
//!
//! Opening a chunk's transfer goes through the fault shell, but once
//! bytes have reached the client a failure aborts the response:
//! re-running a transfer would emit duplicate bytes. The client
//! observes a truncated body and re-requests.

use std::collections::VecDeque;

use anyhow::anyhow;
use async_stream::try_stream;
use axum::body::Body;
use axum::extract::{Extension, Path};
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::time::Instant;
use tracing::instrument;
use uuid::Uuid;

use crate::chunking::CHUNK_COUNT;
use crate::config::DOWNLOAD_TIMEOUT;
use crate::error::{ErrorKind, ServerResult};
use crate::fault::ClientError;
use crate::State;
use hexad::db::entity::chunk::ChunkModel;
use hexad::db::entity::file::FileState;
use hexad::db::HexadDatabase;

/// Number of chunk transfers kept open ahead of the byte cursor.
const CHUNK_PREFETCH: usize = 2;

/// Streams a file back to the client.
#[instrument(skip_all, fields(file_id = %file_id))]
#[axum_macros::debug_handler]
pub(crate) async fn download_file(
    Extension(state): Extension<State>,
    Path(file_id): Path<String>,
) -> ServerResult<Response> {
    let file_id = Uuid::parse_str(&file_id)
        .map_err(|error| ErrorKind::InvalidInput(anyhow!("invalid file id: {}", error)))?;

    let db = state.database().await?;
    let (file, chunks) = db
        .file_with_chunks(file_id)
        .await?
        .ok_or(ErrorKind::NotFound)?;

    if file.state != FileState::Completed {
        return Err(ErrorKind::Conflict {
            state: file.state.as_str(),
        }
        .into());
    }

    if chunks.len() != CHUNK_COUNT {
        tracing::error!(
            "completed file {} has {} chunk rows",
            file.id,
            chunks.len()
        );
        return Err(ErrorKind::InternalServerError.into());
    }

    let deadline = Instant::now() + DOWNLOAD_TIMEOUT;
    let body = Body::from_stream(assemble_chunks(state.clone(), chunks, deadline));

    let filename: String = file
        .name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c == '"' { '\'' } else { c })
        .collect();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, file.content_type)
        .header(header::CONTENT_LENGTH, file.size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(body)
        .map_err(|error| {
            tracing::error!("failed to build download response: {}", error);
            ErrorKind::InternalServerError.into()
        })
}

/// Reassembles a file from its chunks, in index order.
///
/// Up to [`CHUNK_PREFETCH`] transfers are in flight at once: the head
/// of the queue is drained to the caller while the ones behind it are
/// dialing, authenticating against the breaker and waiting for their
/// first frame.
fn assemble_chunks(
    state: State,
    chunks: Vec<ChunkModel>,
    deadline: Instant,
) -> impl Stream<Item = Result<Bytes, ClientError>> + Send + 'static {
    try_stream! {
        let mut pending: VecDeque<ChunkModel> = chunks.into_iter().collect();
        let mut inflight = VecDeque::new();

        loop {
            while inflight.len() < CHUNK_PREFETCH {
                match pending.pop_front() {
                    Some(chunk) => inflight.push_back(tokio::spawn(open_chunk(
                        state.clone(),
                        chunk,
                        deadline,
                    ))),
                    None => break,
                }
            }

            let opening = match inflight.pop_front() {
                Some(opening) => opening,
                None => break,
            };

            let mut transfer = opening.await.expect("chunk transfer task panicked")?;
            while let Some(piece) = transfer.next().await {
                let piece = piece?;
                yield piece;
            }
        }
    }
}

/// Opens one chunk's receive stream through the fault shell.
async fn open_chunk(
    state: State,
    chunk: ChunkModel,
    deadline: Instant,
) -> Result<BoxStream<'static, Result<Bytes, ClientError>>, ClientError> {
    if Instant::now() > deadline {
        return Err(ClientError::Timeout);
    }

    let client = state
        .cluster
        .client(chunk.server_id)
        .ok_or(ClientError::NotConnected)?;

    state
        .cluster
        .execute(chunk.server_id, move || {
            let client = client.clone();
            client.open_chunk_stream(chunk.id)
        })
        .await
}
