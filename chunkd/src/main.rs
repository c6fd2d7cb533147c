use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sea_orm::Database;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use hexad_chunkd::config;
use hexad_chunkd::registry;
use hexad_chunkd::service;
use hexad_chunkd::store::ChunkStore;

/// Hexad chunk server.
#[derive(Debug, Parser)]
#[clap(version)]
struct Opts {
    /// Socket address to listen on.
    ///
    /// This overrides `RPC_PORT` from the environment.
    #[clap(short = 'l', long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dump_version();

    let opts = Opts::parse();
    let config = config::load_config_from_env()?;
    let listen = opts.listen.unwrap_or(config.listen);

    eprintln!("Starting chunk server at {}...", config.advertise_address);

    let db = Database::connect(&config.database_url).await?;
    let store = Arc::new(ChunkStore::new(&config.data_dir).await?);

    let server_id = registry::register(&db, &config, &store).await?;

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    let heartbeat = tokio::spawn(registry::run_heartbeat(
        db.clone(),
        server_id,
        token.clone(),
    ));

    let listener = TcpListener::bind(listen).await?;
    eprintln!("Chunk service listening on {:?}...", listen);

    service::serve(listener, store, token.clone()).await;

    let _ = heartbeat.await;
    eprintln!("Chunk server stopped");

    Ok(())
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

fn dump_version() {
    #[cfg(debug_assertions)]
    eprintln!("Hexad Chunk Server {} (debug)", env!("CARGO_PKG_VERSION"));

    #[cfg(not(debug_assertions))]
    eprintln!("Hexad Chunk Server {} (release)", env!("CARGO_PKG_VERSION"));
}
