//! Chunk server configuration.
//!
//! Configured entirely through the environment: `DATABASE_URL`
//! (required), `SERVER_ID` (optional identity), `RPC_PORT` (default
//! 50051) and `DATA_DIR` (default `/data`). Remaining tunables are
//! compiled-in defaults.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use uuid::Uuid;

/// Environment variable storing the database connection string.
const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Environment variable storing the server identity.
///
/// Identity is ultimately keyed on the advertised address: a server
/// re-registering on a known address keeps the registry's id, and this
/// value is only used for a first registration.
const ENV_SERVER_ID: &str = "SERVER_ID";

/// Environment variable storing the chunk-service listen port.
const ENV_RPC_PORT: &str = "RPC_PORT";

/// Environment variable storing the data directory.
const ENV_DATA_DIR: &str = "DATA_DIR";

/// Default chunk-service port.
const DEFAULT_RPC_PORT: u16 = 50051;

/// Default data directory.
const DEFAULT_DATA_DIR: &str = "/data";

/// How often the server bumps its heartbeat.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for a chunk server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity to register under if the address is new.
    pub server_id: Uuid,

    /// Socket address the chunk service listens on.
    pub listen: SocketAddr,

    /// Root of the chunk store.
    pub data_dir: PathBuf,

    /// Database connection string.
    pub database_url: String,

    /// `host:port` routers dial to reach this server.
    pub advertise_address: String,
}

/// Loads the configuration from the environment.
pub fn load_config_from_env() -> Result<Config> {
    let database_url = env::var(ENV_DATABASE_URL)
        .map_err(|_| anyhow!("{} must be set", ENV_DATABASE_URL))?;

    let server_id = match env::var(ENV_SERVER_ID) {
        Ok(value) => Uuid::parse_str(&value)
            .map_err(|_| anyhow!("{} is not a valid UUID: {:?}", ENV_SERVER_ID, value))?,
        Err(_) => Uuid::new_v4(),
    };

    let port = match env::var(ENV_RPC_PORT) {
        Ok(port) => port
            .parse::<u16>()
            .map_err(|_| anyhow!("{} is not a valid port: {:?}", ENV_RPC_PORT, port))?,
        Err(_) => DEFAULT_RPC_PORT,
    };

    let data_dir = match env::var(ENV_DATA_DIR) {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => PathBuf::from(DEFAULT_DATA_DIR),
    };

    // The advertised address is how routers dial back in. The
    // hostname matches the service name under container orchestration.
    let hostname = nix::unistd::gethostname()
        .map_err(|error| anyhow!("cannot determine hostname: {}", error))?
        .into_string()
        .map_err(|_| anyhow!("hostname is not valid UTF-8"))?;

    Ok(Config {
        server_id,
        listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        data_dir,
        database_url,
        advertise_address: format!("{}:{}", hostname, port),
    })
}
