mod device;
mod note;
mod sensor;

pub use device::*;
pub use note::*;
pub use sensor::*;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Physical zone of the grow room.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sector {
    #[default]
    A,
    B,
    C,
    D,
}

impl Sector {
    pub const ALL: [Sector; 4] = [Sector::A, Sector::B, Sector::C, Sector::D];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sector::A => "A",
            Sector::B => "B",
            Sector::C => "C",
            Sector::D => "D",
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSectorError(pub String);

impl fmt::Display for ParseSectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown sector: {:?}", self.0)
    }
}

impl std::error::Error for ParseSectorError {}

impl FromStr for Sector {
    type Err = ParseSectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Sector::A),
            "B" | "b" => Ok(Sector::B),
            "C" | "c" => Ok(Sector::C),
            "D" | "d" => Ok(Sector::D),
            other => Err(ParseSectorError(other.to_string())),
        }
    }
}

/// Mode governing a device's on/off behaviour.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlType {
    /// Fixed daily on/off window
    #[default]
    Schedule,
    /// Forced on
    On,
    /// Forced off
    Off,
    /// Driven by a sensor threshold band
    Threshold,
    /// Operator toggles only
    Manual,
}

impl ControlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlType::Schedule => "Schedule",
            ControlType::On => "On",
            ControlType::Off => "Off",
            ControlType::Threshold => "Threshold",
            ControlType::Manual => "Manual",
        }
    }
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
