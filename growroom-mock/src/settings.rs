use std::error::Error;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mock {
    pub host: String,
    pub port: u16,
    pub update_interval_secs: u64,
}

impl Mock {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub mock: Mock,
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        let settings: Settings = toml::from_str(include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../",
            "configs/default.toml"
        )))?;

        Ok(settings)
    }
}
