//! Server configuration.
//!
//! Stored as TOML at `~/.config/chunkbus/server.toml` (created with
//! defaults on first run).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use chunkbus_protocol::constants::{DEFAULT_BUS_PORT, MAX_SERVER_MEMORY_BYTES};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Loopback port of the bus endpoint.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory finalised files land in.
    #[serde(default = "default_outdir")]
    pub outdir: String,

    /// In-flight chunk memory budget in bytes.
    #[serde(default = "default_memory_budget")]
    pub memory_budget_bytes: usize,

    /// Worker pool size (0 = CPU parallelism).
    #[serde(default)]
    pub workers: usize,
}

fn default_port() -> u16 {
    DEFAULT_BUS_PORT
}

fn default_outdir() -> String {
    "received".into()
}

fn default_memory_budget() -> usize {
    MAX_SERVER_MEMORY_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            outdir: default_outdir(),
            memory_budget_bytes: default_memory_budget(),
            workers: 0,
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Saves the current configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("chunkbus")
        .join("server.toml")
}
