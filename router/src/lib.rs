//! The Hexad router.
//!
//! A stateless request-routing tier: clients upload and download files
//! over HTTP, the router splits every file into six chunks, places
//! them on chunk servers via the consistent-hash ring, and keeps the
//! durable metadata in the relational store.

#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables,)
)]

mod api;
mod chunking;
mod cluster;
pub mod config;
mod error;
mod fault;
mod reclamation;

#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::http::Uri;
use axum::{extract::Extension, Router};
use sea_orm::{Database, DatabaseConnection};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;

use cluster::Cluster;
use config::Config;
use error::{ErrorKind, ServerError, ServerResult};
use hexad::db::migration::{Migrator, MigratorTrait};

pub type State = Arc<StateInner>;

/// Global router state.
pub struct StateInner {
    /// The router configuration.
    config: Config,

    /// Handle to the metadata store.
    database: OnceCell<DatabaseConnection>,

    /// The chunk-server fleet: ring, clients, breakers.
    cluster: Cluster,
}

impl StateInner {
    async fn new(config: Config) -> State {
        Arc::new(Self {
            config,
            database: OnceCell::new(),
            cluster: Cluster::new(),
        })
    }

    /// Returns a handle to the metadata store.
    async fn database(&self) -> ServerResult<&DatabaseConnection> {
        self.database
            .get_or_try_init(|| async {
                Database::connect(&self.config.database_url)
                    .await
                    .map_err(ServerError::database_error)
            })
            .await
    }
}

/// The fallback route.
async fn fallback(_: Uri) -> ServerResult<()> {
    Err(ErrorKind::NotFound.into())
}

/// Resolves the cancellation token when the process is told to stop.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    eprintln!("Shutting down gracefully...");
    token.cancel();
}

/// Runs the API server and its background loops.
pub async fn run_api_server(
    cli_listen: Option<SocketAddr>,
    config: Config,
    with_reclamation: bool,
) -> Result<()> {
    eprintln!("Starting API server...");

    let state = StateInner::new(config).await;
    let listen = cli_listen.unwrap_or(state.config.listen);

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    // Prime the ring before accepting requests.
    {
        let db = state.database().await?;
        state.cluster.refresh(db).await?;
    }

    let mut loops = Vec::new();
    loops.push(tokio::spawn(cluster::run_ring_refresh(
        state.clone(),
        token.clone(),
    )));
    loops.push(tokio::spawn(cluster::run_connection_health(
        state.clone(),
        token.clone(),
    )));
    if with_reclamation {
        loops.push(tokio::spawn(reclamation::run_reclamation(
            state.clone(),
            token.clone(),
        )));
    }

    let app = Router::new()
        .merge(api::get_router())
        .fallback(fallback)
        // Uploads are bounded by the coordinator, not the framework.
        .layer(DefaultBodyLimit::disable())
        .layer(Extension(state.clone()))
        .layer(CatchPanicLayer::new());

    let listener = TcpListener::bind(listen).await?;
    eprintln!("Listening on {:?}...", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(token.clone().cancelled_owned())
        .await?;

    token.cancel();
    for task in loops {
        let _ = task.await;
    }

    state.cluster.shutdown().await;

    Ok(())
}

/// Runs the reclamation worker on its own, without the API surface.
pub async fn run_reclaimer(config: Config, once: bool) -> Result<()> {
    let state = StateInner::new(config).await;

    // The sweeper reaches chunk servers through the cluster, so the
    // ring has to exist here too.
    {
        let db = state.database().await?;
        state.cluster.refresh(db).await?;
    }

    if once {
        reclamation::run_reclamation_once(&state).await?;
        state.cluster.shutdown().await;
        return Ok(());
    }

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    let refresh = tokio::spawn(cluster::run_ring_refresh(state.clone(), token.clone()));
    reclamation::run_reclamation(state.clone(), token.clone()).await;

    let _ = refresh.await;
    state.cluster.shutdown().await;

    Ok(())
}

/// Runs database migrations.
pub async fn run_migrations(config: Config) -> Result<()> {
    eprintln!("Running migrations...");

    let state = StateInner::new(config).await;
    let db = state.database().await?;
    Migrator::up(db, None).await?;

    Ok(())
}
