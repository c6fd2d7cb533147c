use std::net::SocketAddr;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use hexad_router::config;

/// Hexad object store router.
#[derive(Debug, Parser)]
#[clap(version)]
#[clap(propagate_version = true)]
struct Opts {
    /// Socket address to listen on.
    ///
    /// This overrides `HTTP_PORT` from the environment.
    #[clap(short = 'l', long)]
    listen: Option<SocketAddr>,

    /// Mode to run.
    #[clap(long, default_value = "monolithic")]
    mode: RouterMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RouterMode {
    /// Run all components.
    Monolithic,

    /// Run the API server without the reclamation worker.
    ApiServer,

    /// Run the reclamation worker periodically.
    Reclaimer,

    /// Run one reclamation pass then exit.
    ReclaimerOnce,

    /// Run the database migrations then exit.
    DbMigrations,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    dump_version();

    let opts = Opts::parse();
    let config = config::load_config_from_env()?;

    match opts.mode {
        RouterMode::Monolithic => {
            hexad_router::run_migrations(config.clone()).await?;
            hexad_router::run_api_server(opts.listen, config, true).await?;
        }
        RouterMode::ApiServer => {
            hexad_router::run_api_server(opts.listen, config, false).await?;
        }
        RouterMode::Reclaimer => {
            hexad_router::run_reclaimer(config, false).await?;
        }
        RouterMode::ReclaimerOnce => {
            hexad_router::run_reclaimer(config, true).await?;
        }
        RouterMode::DbMigrations => {
            hexad_router::run_migrations(config).await?;
        }
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt::init();
}

fn dump_version() {
    #[cfg(debug_assertions)]
    eprintln!("Hexad Router {} (debug)", env!("CARGO_PKG_VERSION"));

    #[cfg(not(debug_assertions))]
    eprintln!("Hexad Router {} (release)", env!("CARGO_PKG_VERSION"));
}
