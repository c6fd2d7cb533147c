//! The upload coordinator.
//!
//! An upload is one multipart `file` field. The body is spooled to a
//! temporary file while the file-level digest is folded over the bytes
//! in order; the spool is what lets the six spans be hashed and
//! re-read independently afterwards, so transfers can run concurrently
//! and be retried without buffering a span in memory.
//!
//! Once the size is known: one transaction creates the pending file
//! and its active session; six span transfers run under a worker
//! budget, each inserting its chunk row when the owning server
//! acknowledges; one final transaction flips the file to completed and
//! closes the session. Any span failure marks the file failed and
//! leaves the session for the reclamation worker.

use std::io;
use std::sync::Arc;

use anyhow::anyhow;
use axum::extract::multipart::Field;
use axum::extract::{Extension, Multipart};
use axum::http::StatusCode;
use axum::Json;
use futures::future::join_all;
use serde::Serialize;
use tempfile::{NamedTempFile, TempPath};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, Take};
use tokio::sync::Semaphore;
use tokio::task::spawn;
use tokio::time;
use tracing::instrument;
use uuid::Uuid;

use crate::chunking::{ChunkPlan, ChunkSpan, PlanError};
use crate::config::{CONCURRENT_CHUNK_UPLOADS, SESSION_TTL, UPLOAD_TIMEOUT};
use crate::error::{ErrorKind, ServerError, ServerResult};
use crate::State;
use hexad::db::entity::file::FileState;
use hexad::db::{HexadDatabase, NewChunk, NewFile};
use hexad::hash::Checksum;
use hexad::stream::{DigestReader, DigestWriter};

#[derive(Serialize)]
pub(crate) struct UploadResponse {
    file_id: Uuid,
    filename: String,
    size: i64,
    content_type: String,
    checksum: String,
    chunks: usize,
    status: &'static str,
}

/// The multipart field, spooled and digested.
struct SpooledFile {
    path: Arc<TempPath>,
    size: u64,
    checksum: Checksum,
    name: String,
    content_type: String,
}

/// Uploads a new file.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn upload_file(
    Extension(state): Extension<State>,
    multipart: Multipart,
) -> ServerResult<(StatusCode, Json<UploadResponse>)> {
    match time::timeout(UPLOAD_TIMEOUT, handle_upload(state, multipart)).await {
        Ok(result) => result,
        Err(_) => Err(ErrorKind::RequestError(anyhow!(
            "upload did not finish within {:?}",
            UPLOAD_TIMEOUT
        ))
        .into()),
    }
}

async fn handle_upload(
    state: State,
    mut multipart: Multipart,
) -> ServerResult<(StatusCode, Json<UploadResponse>)> {
    let mut spooled = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ServerError::request_error)?
    {
        if field.name() == Some("file") {
            spooled = Some(spool_field(field).await?);
            break;
        }
    }

    let spooled = spooled.ok_or_else(|| {
        ErrorKind::InvalidInput(anyhow!("multipart field \"file\" is required"))
    })?;

    let plan = ChunkPlan::for_size(spooled.size).map_err(|error| match error {
        PlanError::Empty => ErrorKind::InvalidInput(anyhow!("file is empty")),
        PlanError::TooLarge { max, .. } => ErrorKind::PayloadTooLarge { max_bytes: max },
    })?;

    let db = state.database().await?;

    let file_id = Uuid::new_v4();
    let (file, session) = db
        .create_file_with_session(
            NewFile {
                id: file_id,
                name: spooled.name.clone(),
                content_type: spooled.content_type.clone(),
                size: plan.total() as i64,
            },
            SESSION_TTL,
        )
        .await?;

    tracing::info!(
        "upload {} ({} bytes, {:?}) started",
        file_id,
        plan.total(),
        file.name
    );

    db.set_file_state(file_id, FileState::Uploading).await?;

    let upload_limit = Arc::new(Semaphore::new(CONCURRENT_CHUNK_UPLOADS));
    let mut futures = Vec::new();

    for span in plan.spans().iter().copied() {
        // Wait for a permit before spawning so a request never holds
        // more transfers than its worker budget.
        let permit = upload_limit
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed");

        let state = state.clone();
        let path = spooled.path.clone();

        futures.push(spawn(async move {
            let result = upload_one_chunk(state, file_id, span, path).await;
            drop(permit);
            result
        }));
    }

    let results: Vec<ServerResult<()>> = join_all(futures)
        .await
        .into_iter()
        .map(|join_result| join_result.expect("chunk transfer task panicked"))
        .collect();

    if let Some(error) = results.into_iter().find_map(Result::err) {
        // The session stays active; reclamation sweeps the leftovers.
        let _ = db.set_file_state(file_id, FileState::Failed).await;
        return Err(error);
    }

    db.finalize_file(file_id, session.id, &spooled.checksum)
        .await?;

    tracing::info!("upload {} completed", file_id);

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            file_id,
            filename: file.name,
            size: file.size,
            content_type: file.content_type,
            checksum: spooled.checksum.to_hex(),
            chunks: plan.spans().len(),
            status: "completed",
        }),
    ))
}

/// Spools the field to a temp file, folding the file digest in byte
/// order and enforcing the size cap as bytes arrive.
async fn spool_field(mut field: Field<'_>) -> ServerResult<SpooledFile> {
    let name = field.file_name().unwrap_or("file").to_string();
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();

    let spool = NamedTempFile::new().map_err(spool_error)?;
    let mut writer = DigestWriter::new(fs::File::from_std(
        spool.reopen().map_err(spool_error)?,
    ));

    while let Some(bytes) = field.chunk().await.map_err(ServerError::request_error)? {
        if writer.bytes_written() + bytes.len() as u64 > crate::chunking::MAX_FILE_SIZE {
            return Err(ErrorKind::PayloadTooLarge {
                max_bytes: crate::chunking::MAX_FILE_SIZE,
            }
            .into());
        }

        writer.write_all(&bytes).await.map_err(spool_error)?;
    }

    writer.flush().await.map_err(spool_error)?;
    let (_, checksum, size) = writer.finish();

    Ok(SpooledFile {
        path: Arc::new(spool.into_temp_path()),
        size,
        checksum,
        name,
        content_type,
    })
}

/// Places one span: digest it, pick its server on the ring, stream it
/// through the fault shell, record the chunk row.
async fn upload_one_chunk(
    state: State,
    file_id: Uuid,
    span: ChunkSpan,
    path: Arc<TempPath>,
) -> ServerResult<()> {
    // The expected digest travels in the header frame, so the span is
    // hashed before the transfer starts.
    let mut reader = DigestReader::new(open_span(&path, span).await.map_err(spool_error)?);
    tokio::io::copy(&mut reader, &mut tokio::io::sink())
        .await
        .map_err(spool_error)?;
    let (_, checksum, _) = reader.finish();

    let chunk_id = Uuid::new_v4();
    let server_id = state.cluster.lookup(&chunk_id.to_string())?;
    let client = state.cluster.client(server_id).ok_or_else(|| {
        ErrorKind::ServerUnavailable(anyhow!("no client for server {}", server_id))
    })?;

    let size = state
        .cluster
        .execute(server_id, move || {
            let client = client.clone();
            let path = path.clone();
            async move {
                // Each attempt re-reads the span from the spool.
                let reader = open_span(&path, span).await?;
                client.put_chunk(chunk_id, checksum, reader).await
            }
        })
        .await
        .map_err(ServerError::from)?;

    state
        .database()
        .await?
        .insert_chunk(NewChunk {
            id: chunk_id,
            file_id,
            chunk_index: span.index as i32,
            server_id,
            size: size as i64,
            checksum,
        })
        .await?;

    tracing::debug!(
        "chunk {} of file {} ({} bytes) placed on {}",
        span.index,
        file_id,
        size,
        server_id
    );

    Ok(())
}

async fn open_span(path: &TempPath, span: ChunkSpan) -> io::Result<Take<fs::File>> {
    let mut file = fs::File::open(path).await?;
    file.seek(io::SeekFrom::Start(span.offset)).await?;
    Ok(file.take(span.size))
}

fn spool_error(error: io::Error) -> ServerError {
    tracing::error!("spool I/O error: {}", error);
    ErrorKind::InternalServerError.into()
}
