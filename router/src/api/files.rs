//! File metadata, listing and deletion.

use std::collections::HashMap;

use anyhow::anyhow;
use axum::extract::{Extension, Path, Query};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{ErrorKind, ServerResult};
use crate::State;
use hexad::db::entity::file::{FileModel, FileState};
use hexad::db::HexadDatabase;

#[derive(Serialize)]
pub(crate) struct FileSummary {
    file_id: Uuid,
    filename: String,
    content_type: String,
    size: i64,
    status: &'static str,
    checksum: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FileModel> for FileSummary {
    fn from(file: FileModel) -> Self {
        Self {
            file_id: file.id,
            filename: file.name,
            content_type: file.content_type,
            size: file.size,
            status: file.state.as_str(),
            checksum: file.checksum,
            created_at: file.created_at,
            updated_at: file.updated_at,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct ChunkMetadata {
    index: i32,
    id: Uuid,
    size: i64,
    server_id: Uuid,
    server_address: Option<String>,
    status: &'static str,
}

#[derive(Serialize)]
pub(crate) struct FileMetadataResponse {
    #[serde(flatten)]
    file: FileSummary,
    chunks: Vec<ChunkMetadata>,
}

/// Returns a file's metadata and chunk distribution.
#[instrument(skip_all, fields(file_id = %file_id))]
pub(crate) async fn file_metadata(
    Extension(state): Extension<State>,
    Path(file_id): Path<String>,
) -> ServerResult<Json<FileMetadataResponse>> {
    let file_id = parse_file_id(&file_id)?;

    let db = state.database().await?;
    let (file, chunks) = db
        .file_with_chunks(file_id)
        .await?
        .ok_or(ErrorKind::NotFound)?;

    let chunks = chunks
        .into_iter()
        .map(|chunk| ChunkMetadata {
            index: chunk.chunk_index,
            id: chunk.id,
            size: chunk.size,
            server_id: chunk.server_id,
            // The address is only known while the server is in the
            // active set.
            server_address: state.cluster.address_of(chunk.server_id),
            status: chunk.state.as_str(),
        })
        .collect();

    Ok(Json(FileMetadataResponse {
        file: file.into(),
        chunks,
    }))
}

#[derive(Serialize)]
pub(crate) struct Pagination {
    page: u64,
    per_page: u64,
    total_count: u64,
    total_pages: u64,
}

#[derive(Serialize)]
pub(crate) struct ListResponse {
    files: Vec<FileSummary>,
    pagination: Pagination,
}

/// Lists files, newest first.
#[instrument(skip_all)]
pub(crate) async fn list_files(
    Extension(state): Extension<State>,
    Query(params): Query<HashMap<String, String>>,
) -> ServerResult<Json<ListResponse>> {
    let page = params
        .get("page")
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|page| *page > 0)
        .unwrap_or(1);

    let per_page = params
        .get("per_page")
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|per_page| (1..=100).contains(per_page))
        .unwrap_or(20);

    let state_filter = match params.get("status") {
        None => None,
        Some(value) => Some(parse_state(value).ok_or_else(|| {
            ErrorKind::InvalidInput(anyhow!("unknown status {:?}", value))
        })?),
    };

    let db = state.database().await?;
    let (files, total_count) = db.list_files(page, per_page, state_filter).await?;

    Ok(Json(ListResponse {
        files: files.into_iter().map(FileSummary::from).collect(),
        pagination: Pagination {
            page,
            per_page,
            total_count,
            total_pages: total_count.div_ceil(per_page),
        },
    }))
}

#[derive(Serialize)]
pub(crate) struct DeleteResponse {
    file_id: Uuid,
    deleted_chunks: usize,
    failed_chunks: usize,
}

/// Deletes a file and its chunks.
///
/// Chunk deletions are best effort and counted either way; the
/// metadata rows go regardless so no dangling chunk rows survive.
/// Chunk files on unreachable servers become disk-level garbage.
#[instrument(skip_all, fields(file_id = %file_id))]
pub(crate) async fn delete_file(
    Extension(state): Extension<State>,
    Path(file_id): Path<String>,
) -> ServerResult<Json<DeleteResponse>> {
    let file_id = parse_file_id(&file_id)?;

    let db = state.database().await?;
    let (_, chunks) = db
        .file_with_chunks(file_id)
        .await?
        .ok_or(ErrorKind::NotFound)?;

    let mut deleted_chunks = 0;
    let mut failed_chunks = 0;

    for chunk in &chunks {
        let Some(client) = state.cluster.client(chunk.server_id) else {
            tracing::warn!(
                "server {} is not in the active set, leaving chunk {} behind",
                chunk.server_id,
                chunk.id
            );
            failed_chunks += 1;
            continue;
        };

        let chunk_id = chunk.id;
        let result = state
            .cluster
            .execute(chunk.server_id, move || {
                let client = client.clone();
                async move { client.delete_chunk(chunk_id).await }
            })
            .await;

        match result {
            Ok(_) => deleted_chunks += 1,
            Err(error) => {
                failed_chunks += 1;
                tracing::warn!("failed to delete chunk {}: {}", chunk_id, error);
            }
        }
    }

    if !db.delete_file(file_id).await? {
        return Err(ErrorKind::NotFound.into());
    }

    tracing::info!(
        "deleted file {} ({} chunks deleted, {} failed)",
        file_id,
        deleted_chunks,
        failed_chunks
    );

    Ok(Json(DeleteResponse {
        file_id,
        deleted_chunks,
        failed_chunks,
    }))
}

fn parse_file_id(value: &str) -> ServerResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|error| ErrorKind::InvalidInput(anyhow!("invalid file id: {}", error)).into())
}

fn parse_state(value: &str) -> Option<FileState> {
    match value {
        "pending" => Some(FileState::Pending),
        "uploading" => Some(FileState::Uploading),
        "completed" => Some(FileState::Completed),
        "failed" => Some(FileState::Failed),
        _ => None,
    }
}
