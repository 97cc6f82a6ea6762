use core::fmt;

use serde::{Deserialize, Serialize};

use super::Sector;
use crate::message::events;

/// Telemetry channels reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    Temperature,
    Humidity,
    Light,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::Light,
    ];

    /// Identifier of the matching threshold device.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "Temperature",
            SensorKind::Humidity => "Humidity",
            SensorKind::Light => "Light",
        }
    }

    pub fn default_unit(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
            SensorKind::Light => "lux",
        }
    }

    /// Number of decimals shown on the dashboard.
    pub fn precision(&self) -> usize {
        match self {
            SensorKind::Temperature | SensorKind::Humidity => 1,
            SensorKind::Light => 0,
        }
    }

    /// Outbound event requesting the latest reading.
    pub fn request_event(&self) -> &'static str {
        match self {
            SensorKind::Temperature => events::GET_TEMPERATURE,
            SensorKind::Humidity => events::GET_HUMIDITY,
            SensorKind::Light => events::GET_LIGHT,
        }
    }

    /// Inbound event carrying the reading.
    pub fn response_event(&self) -> &'static str {
        match self {
            SensorKind::Temperature => events::TEMPERATURE_DATA,
            SensorKind::Humidity => events::HUMIDITY_DATA,
            SensorKind::Light => events::LIGHT_DATA,
        }
    }

    pub fn from_response_event(event: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.response_event() == event)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single sensor value with its unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Reading {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: Some(unit.into()),
        }
    }
}

/// Payload of `temperature_data`, `humidity_data` and `light_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Reading>,
}

/// Readings pushed for one sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light: Option<f64>,
    pub sector: Sector,
}

impl SensorUpdate {
    pub fn get(&self, kind: SensorKind) -> Option<f64> {
        match kind {
            SensorKind::Temperature => self.temperature,
            SensorKind::Humidity => self.humidity,
            SensorKind::Light => self.light,
        }
    }
}

/// Payload of `sensor_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorUpdatePayload {
    pub data: SensorUpdate,
}
