use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs, io};

use serde::{Deserialize, Serialize};

use crate::error::Result;

const DEFAULT_CONFIG: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../",
    "configs/default.toml"
));

/// Overrides the backend address from the configuration files.
pub const ENDPOINT_ENV: &str = "GROWROOM_ENDPOINT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub handshake_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub poll_interval_secs: u64,
}

impl Connection {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 10,
            retry_delay_ms: 1000,
            poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Storage {
    /// File backing the persisted keys; in-memory when absent
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub server: Server,
    #[serde(default)]
    pub connection: Connection,
    #[serde(default)]
    pub storage: Storage,
}

impl Settings {
    /// Loads the embedded defaults, the optional `configs/<RUN_MODE>.toml`
    /// overlay and the environment override, in that order.
    pub fn new() -> Result<Self> {
        let run_mode = env::var("RUN_MODE").unwrap_or("development".into());
        let overlay = PathBuf::from(format!("configs/{run_mode}.toml"));

        let overlay = if overlay.is_file() {
            Some(fs::read_to_string(&overlay)?)
        } else {
            None
        };

        let mut settings = Self::layered(overlay.as_deref())?;

        if let Ok(endpoint) = env::var(ENDPOINT_ENV) {
            settings.server.endpoint = endpoint;
        }

        if let Some(path) = &settings.storage.path {
            let normalized = normalize_path(path)?.to_string_lossy().to_string();
            settings.storage.path = Some(normalized);
        }

        Ok(settings)
    }

    /// Parses the embedded defaults with an optional overlay applied on top.
    pub fn layered(overlay: Option<&str>) -> Result<Self> {
        let mut table: toml::Table = toml::from_str(DEFAULT_CONFIG)?;

        if let Some(overlay) = overlay {
            merge(&mut table, toml::from_str(overlay)?);
        }

        Ok(toml::Value::Table(table).try_into()?)
    }
}

fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(overlay_table) = value {
            if let Some(toml::Value::Table(base_table)) = base.get_mut(&key) {
                merge(base_table, overlay_table);
                continue;
            }
            base.insert(key, toml::Value::Table(overlay_table));
        } else {
            base.insert(key, value);
        }
    }
}

fn normalize_path(path: &str) -> io::Result<PathBuf> {
    let path_buf = PathBuf::from(path);

    Ok(if path_buf.is_absolute() {
        path_buf
    } else {
        env::current_dir()?.join(&path_buf)
    })
}
