//! Router configuration.
//!
//! The router is configured entirely through the environment:
//! `DATABASE_URL` (required) and `HTTP_PORT` (default 8080). All
//! other tunables are compiled-in defaults below; exposing them is an
//! operational concern the router does not take on.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Environment variable storing the database connection string.
const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Environment variable storing the HTTP listen port.
const ENV_HTTP_PORT: &str = "HTTP_PORT";

/// Default HTTP listen port.
const DEFAULT_HTTP_PORT: u16 = 8080;

/// How long a server heartbeat stays fresh.
///
/// A registered server with an older heartbeat is not live and gets
/// removed from the ring at the next refresh.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the router re-derives the active set from the registry.
pub const RING_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// How often the router inspects its chunk-server connections.
pub const CONNECTION_HEALTH_INTERVAL: Duration = Duration::from_secs(10);

/// Bound on dialing a chunk server.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the reclamation worker sweeps expired sessions.
pub const RECLAMATION_INTERVAL: Duration = Duration::from_secs(300);

/// Bound on one chunk deletion during reclamation.
pub const CHUNK_DELETE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifetime of an upload session.
pub const SESSION_TTL: Duration = Duration::from_secs(3600);

/// Budget for one upload request.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Budget for one download request.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Number of chunk transfers in flight for one upload request.
pub const CONCURRENT_CHUNK_UPLOADS: usize = 6;

/// Configuration for the router.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address to listen on.
    pub listen: SocketAddr,

    /// Database connection string.
    pub database_url: String,
}

/// Loads the configuration from the environment.
pub fn load_config_from_env() -> Result<Config> {
    let database_url = env::var(ENV_DATABASE_URL)
        .map_err(|_| anyhow!("{} must be set", ENV_DATABASE_URL))?;

    let port = match env::var(ENV_HTTP_PORT) {
        Ok(port) => port
            .parse::<u16>()
            .map_err(|_| anyhow!("{} is not a valid port: {:?}", ENV_HTTP_PORT, port))?,
        Err(_) => DEFAULT_HTTP_PORT,
    };

    Ok(Config {
        listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        database_url,
    })
}
