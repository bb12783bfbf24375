//! Messenger configuration.
//!
//! Stored as TOML, by default at `~/.enclave/config.toml`. Every field is
//! optional in the file; missing fields fall back to the defaults below.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the data directory under the user's home.
pub const DATA_DIR_NAME: &str = ".enclave";

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default address the TCP listener binds to.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0";

/// Default TCP port for peer connections.
pub const DEFAULT_LISTEN_PORT: u16 = 12345;

/// Well-known UDP port for LAN discovery.
pub const DEFAULT_DISCOVERY_PORT: u16 = 37020;

/// Default time the prober waits for discovery responses.
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 5;

/// Default number of messages returned by a history query.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Largest accepted frame body (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Errors that can occur when loading or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Configuration for one messenger instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MessengerConfig {
    /// Directory holding key files and databases.
    pub data_dir: PathBuf,

    /// Address the TCP listener binds to.
    pub listen_addr: String,

    /// TCP port for peer connections.
    pub listen_port: u16,

    /// UDP port for discovery probes.
    pub discovery_port: u16,

    /// Seconds to wait for discovery responses.
    pub discovery_timeout_secs: u64,

    /// Messages returned by a history query.
    pub history_limit: usize,

    /// Largest accepted frame body in bytes.
    pub max_frame_len: usize,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            discovery_timeout_secs: DEFAULT_DISCOVERY_TIMEOUT_SECS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl MessengerConfig {
    /// Config rooted at a specific data directory, other fields default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from `path`, or defaults if it doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save configuration as TOML, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        default_data_dir().join(CONFIG_FILE_NAME)
    }

    /// Path of the SQLite database for `username`.
    pub fn database_path(&self, username: &str) -> PathBuf {
        self.data_dir.join(format!("{username}.db"))
    }

    /// Discovery timeout as a `Duration`.
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

/// Get the Enclave data directory.
///
/// Returns `~/.enclave`, or `./enclave_data` when no home directory is known.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("enclave_data"))
}
