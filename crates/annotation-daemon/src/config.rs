//! Configuration loading and management

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Runtime configuration for the relay daemon.
///
/// Every field has a default, so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the WebSocket relay listens on
    #[serde(default = "default_ws_listen")]
    pub ws_listen: String,

    /// Address the HTTP history endpoint listens on
    #[serde(default = "default_http_listen")]
    pub http_listen: String,

    /// SQLite database file holding annotation records
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Frames queued per connection before a slow client is dropped
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Largest inbound frame accepted, in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_ws_listen() -> String {
    "0.0.0.0:8181".to_string()
}

fn default_http_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database() -> PathBuf {
    PathBuf::from("xfdf.db")
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024 // 16MB
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_listen: default_ws_listen(),
            http_listen: default_http_listen(),
            database: default_database(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_message_size: default_max_message_size(),
        }
    }
}

/// Values given on the command line (or via env), applied over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub ws_listen: Option<String>,
    pub http_listen: Option<String>,
    pub database: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// With no path, defaults are used. A path that does not exist yet gets
    /// the default config written to it for reference.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Config::default());
        };

        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", path);
            let config = Config::default();

            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write default config: {:?}", path))?;
            tracing::info!("Created default config at {:?}", path);

            Ok(config)
        }
    }

    /// Apply command line overrides.
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(ws_listen) = overrides.ws_listen {
            self.ws_listen = ws_listen;
        }
        if let Some(http_listen) = overrides.http_listen {
            self.http_listen = http_listen;
        }
        if let Some(database) = overrides.database {
            self.database = database;
        }
        self
    }
}
