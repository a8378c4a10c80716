//! Indexer configuration, loaded from the environment.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct Config {
    /// Node RPC endpoint.
    pub rpc_url: String,
    /// Node websocket endpoint for the confirmation fast path, if any.
    pub ws_url: Option<String>,
    /// Address the query API listens on.
    pub listen: SocketAddr,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// How often every chain is replayed.
    pub replay_interval: Duration,
    /// How often state is persisted.
    pub persist_interval: Duration,
}

fn interval(name: &str, default_secs: u64) -> Duration {
    let secs = env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let rpc_url = env::var("TKN_RPC_URL").unwrap_or_else(|_| "http://[::1]:7076".to_string());
        let ws_url = env::var("TKN_WS_URL").ok().filter(|url| !url.is_empty());
        let listen = env::var("TKN_LISTEN")
            .unwrap_or_else(|_| "[::1]:7080".to_string())
            .parse()
            .context("TKN_LISTEN must be a socket address")?;
        let db_path = env::var("TKN_DB_PATH")
            .unwrap_or_else(|_| "./chains.db".to_string())
            .into();
        Ok(Self {
            rpc_url,
            ws_url,
            listen,
            db_path,
            replay_interval: interval("TKN_REPLAY_INTERVAL_SECS", 10),
            persist_interval: interval("TKN_PERSIST_INTERVAL_SECS", 30),
        })
    }
}
