//! The health surface.

use anyhow::anyhow;
use axum::extract::Extension;
use axum::Json;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, Statement};
use serde::Serialize;
use tracing::instrument;

use crate::config::HEARTBEAT_TIMEOUT;
use crate::error::{ErrorKind, ServerResult};
use crate::State;
use hexad::db::HexadDatabase;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    storage_servers: usize,
    timestamp: DateTime<Utc>,
}

/// Reports whether the router can do useful work.
#[instrument(skip_all)]
pub(crate) async fn health_check(
    Extension(state): Extension<State>,
) -> ServerResult<Json<HealthResponse>> {
    let db = state
        .database()
        .await
        .map_err(|_| ErrorKind::ServerUnavailable(anyhow!("database unreachable")))?;

    let ping = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.execute(ping)
        .await
        .map_err(|error| ErrorKind::ServerUnavailable(anyhow!("database unreachable: {}", error)))?;

    let servers = db.live_servers(HEARTBEAT_TIMEOUT).await?;

    Ok(Json(HealthResponse {
        status: "healthy",
        storage_servers: servers.len(),
        timestamp: Utc::now(),
    }))
}
