//! Registration and heartbeat, the server half of membership.

use anyhow::Result;
use sea_orm::DatabaseConnection;
use tokio::time;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{Config, HEARTBEAT_INTERVAL};
use crate::store::ChunkStore;
use hexad::db::HexadDatabase;
use hexad::ring::VIRTUAL_NODES_PER_SERVER;

/// Registers this server and rebuilds its ring nodes.
///
/// Registration is keyed on the advertised address: a restart on the
/// same address keeps the registry identity, and the ring-node rows
/// are replaced wholesale so exactly one full set exists.
pub async fn register(
    db: &DatabaseConnection,
    config: &Config,
    store: &ChunkStore,
) -> Result<Uuid> {
    let usage = store.usage()?;

    let server = db
        .register_server(
            config.server_id,
            &config.advertise_address,
            usage.available as i64,
            usage.used as i64,
        )
        .await?;

    db.replace_ring_nodes(server.id).await?;

    tracing::info!(
        "registered as {} at {} ({} ring nodes)",
        server.id,
        config.advertise_address,
        VIRTUAL_NODES_PER_SERVER
    );

    Ok(server.id)
}

/// Bumps the heartbeat until cancelled.
///
/// Failures are silent beyond a log line: a server that cannot
/// heartbeat simply ages out of the active set.
pub async fn run_heartbeat(db: DatabaseConnection, server_id: Uuid, token: CancellationToken) {
    let mut interval = time::interval(HEARTBEAT_INTERVAL);
    tracing::info!(
        "heartbeat loop started (interval: {:?})",
        HEARTBEAT_INTERVAL
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                match db.update_heartbeat(server_id).await {
                    Ok(true) => {}
                    Ok(false) => tracing::warn!("server row {} is gone from the registry", server_id),
                    Err(error) => tracing::warn!("heartbeat failed: {}", error),
                }
            }
        }
    }

    tracing::info!("heartbeat loop stopped");
}
