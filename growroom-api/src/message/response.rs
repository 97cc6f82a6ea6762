use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::models::Sector;

/// Payload of `command_response` and `type_change_response`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl CommandResponse {
    pub fn ok(details: Map<String, Value>) -> Self {
        Self {
            error: None,
            details,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            error: Some(Value::String(message.into())),
            details: Map::new(),
        }
    }

    /// Echoes the sector and device of the command being answered.
    pub fn for_target(mut self, sector: Sector, device: impl Into<String>) -> Self {
        self.details.insert("sector".into(), json!(sector));
        self.details.insert("device".into(), json!(device.into()));
        self
    }

    pub fn sector(&self) -> Option<Sector> {
        self.details
            .get("sector")
            .and_then(|sector| serde_json::from_value(sector.clone()).ok())
    }

    pub fn device(&self) -> Option<&str> {
        self.details.get("device").and_then(Value::as_str)
    }

    /// The backend's error description, if the command was rejected.
    pub fn error_message(&self) -> Option<String> {
        match &self.error {
            None | Some(Value::Null) | Some(Value::Bool(false)) => None,
            Some(Value::String(message)) => Some(message.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}
