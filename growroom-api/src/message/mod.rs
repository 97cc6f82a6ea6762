mod command;
mod response;

pub use command::{CommandExtra, DeviceCommand};
pub use response::CommandResponse;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Names of the events exchanged over the channel.
pub mod events {
    pub const DEVICE_COMMAND: &str = "device_command";
    pub const CONTROL_TYPE_CHANGE: &str = "control_type_change";
    pub const PING: &str = "ping";
    pub const GET_TEMPERATURE: &str = "get_temperature";
    pub const GET_HUMIDITY: &str = "get_humidity";
    pub const GET_LIGHT: &str = "get_light";
    pub const GET_CSV_NOTE: &str = "get_csv_note";
    pub const ADD_NOTE: &str = "add_note";
    pub const DELETE_NOTE: &str = "delete_note";

    pub const PONG: &str = "pong";
    pub const COMMAND_RESPONSE: &str = "command_response";
    pub const TYPE_CHANGE_RESPONSE: &str = "type_change_response";
    pub const TEMPERATURE_DATA: &str = "temperature_data";
    pub const HUMIDITY_DATA: &str = "humidity_data";
    pub const LIGHT_DATA: &str = "light_data";
    pub const SENSOR_UPDATE: &str = "sensor_update";
    pub const CSV_NOTE_RESPONSE: &str = "csv_note_response";
}

/// One named event and its payload.
///
/// Inbound frames may carry the name under `type` instead of `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(alias = "type")]
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}
