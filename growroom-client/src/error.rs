use growroom_api::Sector;
use growroom_api::models::ParseSectorError;
use growroom_api::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Formatting error: {0}")]
    Format(#[from] time::error::Format),

    #[error("Invalid sector: {0}")]
    InvalidSector(#[from] ParseSectorError),

    #[error("Unknown device {device} in sector {sector}")]
    UnknownDevice { sector: Sector, device: String },

    #[error("Invalid note: {0}")]
    InvalidNote(String),

    #[error("Channel closed")]
    ChannelClosed,
}

impl ClientError {
    pub fn unknown_device(sector: Sector, device: impl Into<String>) -> Self {
        Self::UnknownDevice {
            sector,
            device: device.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
