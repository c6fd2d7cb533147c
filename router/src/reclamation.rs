//! Reclamation of expired upload sessions.
//!
//! Uploads that never finalized leave behind a `pending`/`failed` file
//! row, some chunk rows and chunk files on the servers. The session
//! row outlives the router process, so a periodic sweep can find the
//! wreckage: every expired active session is resolved by deleting its
//! chunk files (best effort), then the file row (cascading the chunk
//! rows), then the session row.
//!
//! The sweep is at-least-once. Re-running it over the same session is
//! harmless: missing chunk files are absorbed, and missing rows end
//! the sweep early.

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::{CHUNK_DELETE_TIMEOUT, RECLAMATION_INTERVAL};
use crate::error::ServerResult;
use crate::fault::ClientError;
use crate::State;
use hexad::db::entity::chunk::ChunkModel;
use hexad::db::entity::upload_session::UploadSessionModel;
use hexad::db::HexadDatabase;

/// Runs reclamation periodically, and once at startup.
pub async fn run_reclamation(state: State, token: CancellationToken) {
    let mut interval = time::interval(RECLAMATION_INTERVAL);
    tracing::info!(
        "reclamation worker started (interval: {:?})",
        RECLAMATION_INTERVAL
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                // A failed pass is retried at the next tick.
                if let Err(error) = run_reclamation_once(&state).await {
                    tracing::warn!("reclamation failed: {}", error);
                }
            }
        }
    }

    tracing::info!("reclamation worker stopped");
}

/// Runs one reclamation pass.
#[instrument(skip_all)]
pub async fn run_reclamation_once(state: &State) -> ServerResult<()> {
    let db = state.database().await?;

    let sessions = db.expired_sessions().await?;
    if sessions.is_empty() {
        tracing::debug!("no expired sessions to reclaim");
        return Ok(());
    }

    tracing::info!("found {} expired sessions to reclaim", sessions.len());

    let mut reclaimed = 0;
    let mut errors = 0;

    for session in sessions {
        // One bad session must never block the rest of the queue.
        match reclaim_session(state, &session).await {
            Ok(()) => reclaimed += 1,
            Err(error) => {
                errors += 1;
                tracing::warn!("failed to reclaim session {}: {}", session.id, error);
            }
        }
    }

    tracing::info!(
        "reclamation pass done: {} sessions reclaimed, {} errors",
        reclaimed,
        errors
    );

    Ok(())
}

async fn reclaim_session(state: &State, session: &UploadSessionModel) -> ServerResult<()> {
    let db = state.database().await?;

    tracing::info!(
        "reclaiming expired session {} for file {}",
        session.id,
        session.file_id
    );

    let chunks = match db.file_with_chunks(session.file_id).await? {
        Some((_, chunks)) => chunks,
        None => {
            // The file is already gone; only the session is left.
            db.delete_session(session.id).await?;
            return Ok(());
        }
    };

    let mut deleted = 0;
    for chunk in &chunks {
        match delete_chunk_file(state, chunk).await {
            Ok(true) => deleted += 1,
            // Already absent. The sweep is at-least-once, so this is
            // the expected outcome of a repeated pass.
            Ok(false) => {}
            Err(error) => {
                tracing::warn!(
                    "failed to delete chunk {} on server {}: {}",
                    chunk.id,
                    chunk.server_id,
                    error
                );
            }
        }
    }

    tracing::debug!(
        "deleted {}/{} chunk files for session {}",
        deleted,
        chunks.len(),
        session.id
    );

    // Metadata goes regardless of how the chunk deletions fared;
    // unreachable chunk files become disk-level garbage.
    db.delete_file(session.file_id).await?;
    db.delete_session(session.id).await?;

    Ok(())
}

/// Deletes one chunk file through the fault shell, bounded in time.
///
/// Returns `Ok(false)` when the file was already gone or the owning
/// server is not in the active set.
async fn delete_chunk_file(state: &State, chunk: &ChunkModel) -> Result<bool, ClientError> {
    let Some(client) = state.cluster.client(chunk.server_id) else {
        tracing::warn!(
            "server {} is not in the active set, leaving chunk {} behind",
            chunk.server_id,
            chunk.id
        );
        return Ok(false);
    };

    let chunk_id = chunk.id;
    let call = state.cluster.execute(chunk.server_id, move || {
        let client = client.clone();
        async move { client.delete_chunk(chunk_id).await }
    });

    match time::timeout(CHUNK_DELETE_TIMEOUT, call).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout),
    }
}
