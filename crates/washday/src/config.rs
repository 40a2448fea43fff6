//! Server configuration.
//!
//! Settings come from an optional JSON file named by `WASHDAY_CONFIG`,
//! then `WASHDAY_BIND` and `WASHDAY_RECORDS` override single fields.
//! Anything not given keeps its default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use washday_room::RoomConfig;

use crate::WashdayError;

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV: &str = "WASHDAY_CONFIG";
/// Environment variable overriding [`ServerConfig::bind`].
pub const BIND_ENV: &str = "WASHDAY_BIND";
/// Environment variable overriding [`ServerConfig::records`].
pub const RECORDS_ENV: &str = "WASHDAY_RECORDS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind: String,

    /// JSON-lines file for finished sessions. Sessions are only logged
    /// when unset.
    pub records: Option<PathBuf>,

    /// A connection that sends nothing for this long is dropped. Clients
    /// heartbeat well within it.
    pub idle_timeout: Duration,

    /// How long a new connection has to send its handshake.
    pub handshake_timeout: Duration,

    /// How often expired rooms are removed from the registry.
    pub reap_interval: Duration,

    /// Rules for every room on this server.
    pub room: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            records: None,
            idle_timeout: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(5),
            reap_interval: Duration::from_secs(30),
            room: RoomConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, WashdayError> {
        Self::load(|key| std::env::var(key).ok())
    }

    /// Loads the configuration, reading variables through `lookup`.
    pub fn load(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, WashdayError> {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        if let Some(bind) = lookup(BIND_ENV) {
            config.bind = bind;
        }
        if let Some(records) = lookup(RECORDS_ENV) {
            config.records = Some(PathBuf::from(records));
        }
        Ok(config)
    }

    /// Reads a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, WashdayError> {
        let text = std::fs::read_to_string(path).map_err(|source| WashdayError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| WashdayError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}
