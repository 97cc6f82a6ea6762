use serde::ser::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{ControlType, Sector};

/// Free-form fields flattened into a device command.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandExtra(Map<String, Value>);

impl CommandExtra {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the extra fields from any value serializing to a JSON object.
    pub fn from_fields<T: Serialize>(fields: &T) -> serde_json::Result<Self> {
        match serde_json::to_value(fields)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(serde_json::Error::custom(format!(
                "command extra must be an object, got {other}"
            ))),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// Payload of both `device_command` and `control_type_change`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub sector: Sector,
    pub device: String,
    pub status: bool,
    #[serde(rename = "type")]
    pub control_type: ControlType,
    #[serde(flatten)]
    pub extra: CommandExtra,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::ScheduleWindow;

    #[test]
    fn test_device_command_flattens_extra() {
        let window = ScheduleWindow::parse("08:00", "18:00").unwrap();
        let command = DeviceCommand {
            sector: Sector::B,
            device: String::from("Pump"),
            status: false,
            control_type: ControlType::Schedule,
            extra: CommandExtra::from_fields(&window).unwrap(),
        };

        assert_eq!(
            serde_json::to_value(&command).unwrap(),
            json!({
                "sector": "B",
                "device": "Pump",
                "status": false,
                "type": "Schedule",
                "startTime": "08:00",
                "endTime": "18:00"
            })
        );

        let parsed: DeviceCommand = serde_json::from_value(serde_json::to_value(&command).unwrap()).unwrap();
        assert_eq!(parsed.extra.get("startTime"), Some(&json!("08:00")));
    }

    #[test]
    fn test_extra_rejects_non_objects() {
        assert!(CommandExtra::from_fields(&42).is_err());
        assert!(CommandExtra::from_fields(&json!({})).unwrap().is_empty());
        assert_eq!(
            CommandExtra::new().with("command", "start").get("command"),
            Some(&json!("start"))
        );
    }
}
