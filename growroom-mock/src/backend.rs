use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::Message as WsMessage;
use growroom_api::events;
use growroom_api::message::{CommandResponse, DeviceCommand};
use growroom_api::models::{
    DeleteNote, NewNote, Note, Reading, SensorKind, SensorResponse, SensorUpdatePayload,
};
use growroom_api::transport::encode;
use growroom_api::{Envelope, Sector};
use serde_json::{Map, Value, json};
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::simulate::{day_fraction, sector_update, simulated_humidity, simulated_lux, simulated_temperature};

/// Shared state of the mock backend: live clients, received traffic and notes.
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    clients: RwLock<HashMap<Uuid, mpsc::UnboundedSender<WsMessage>>>,
    received: RwLock<Vec<Envelope>>,
    notes: RwLock<Vec<Note>>,
    reject_commands: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notes(notes: Vec<Note>) -> Self {
        Self {
            inner: Arc::new(Inner {
                notes: RwLock::new(notes),
                ..Default::default()
            }),
        }
    }

    /// Answers every command with an error while set.
    pub fn set_reject_commands(&self, reject: bool) {
        self.inner.reject_commands.store(reject, Ordering::SeqCst);
    }

    pub async fn active_clients(&self) -> usize {
        self.inner.clients.read().await.len()
    }

    pub async fn received(&self) -> Vec<Envelope> {
        self.inner.received.read().await.clone()
    }

    pub async fn received_events(&self, event: &str) -> Vec<Envelope> {
        self.inner
            .received
            .read()
            .await
            .iter()
            .filter(|envelope| envelope.event == event)
            .cloned()
            .collect()
    }

    pub async fn notes(&self) -> Vec<Note> {
        self.inner.notes.read().await.clone()
    }

    pub(crate) async fn register(&self, id: Uuid, tx: mpsc::UnboundedSender<WsMessage>) {
        self.inner.clients.write().await.insert(id, tx);
    }

    pub(crate) async fn unregister(&self, id: Uuid) {
        self.inner.clients.write().await.remove(&id);
    }

    /// Sends `envelope` to every client, returning how many accepted it.
    pub async fn broadcast(&self, envelope: &Envelope) -> usize {
        let frame = match encode(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode broadcast: {}", e);
                return 0;
            }
        };

        self.inner
            .clients
            .read()
            .await
            .values()
            .filter(|tx| tx.send(WsMessage::Text(frame.clone())).is_ok())
            .count()
    }

    /// Closes every client session.
    pub async fn disconnect_all(&self) {
        for tx in self.inner.clients.read().await.values() {
            let _ = tx.send(WsMessage::Close(None));
        }
    }

    /// Pushes one reading per sector.
    pub async fn push_sensor_updates(&self) {
        let fraction = day_fraction(OffsetDateTime::now_utc());

        for sector in Sector::ALL {
            let payload = SensorUpdatePayload {
                data: sector_update(sector, fraction),
            };
            match serde_json::to_value(payload) {
                Ok(data) => {
                    self.broadcast(&Envelope::new(events::SENSOR_UPDATE, data))
                        .await;
                }
                Err(e) => tracing::error!("Failed to encode sensor update: {}", e),
            }
        }
    }

    /// Records `envelope` and returns the frames answering it.
    pub async fn handle(&self, envelope: Envelope) -> Vec<String> {
        tracing::debug!(event = %envelope.event, "Received {}", envelope.data);
        self.inner.received.write().await.push(envelope.clone());

        let reply = match envelope.event.as_str() {
            events::PING => Some(Envelope::new(events::PONG, json!({}))),
            events::DEVICE_COMMAND => Some(self.command_reply(events::COMMAND_RESPONSE, &envelope.data)),
            events::CONTROL_TYPE_CHANGE => {
                Some(self.command_reply(events::TYPE_CHANGE_RESPONSE, &envelope.data))
            }
            events::GET_TEMPERATURE => Some(sensor_reply(SensorKind::Temperature)),
            events::GET_HUMIDITY => Some(sensor_reply(SensorKind::Humidity)),
            events::GET_LIGHT => Some(sensor_reply(SensorKind::Light)),
            events::GET_CSV_NOTE => None,
            events::ADD_NOTE => {
                self.add_note(&envelope.data).await;
                None
            }
            events::DELETE_NOTE => {
                self.delete_note(&envelope.data).await;
                None
            }
            other => {
                tracing::warn!("No handler for {}", other);
                return Vec::new();
            }
        };

        let frame = match reply {
            Some(reply) => encode(&reply).map_err(|e| e.to_string()),
            // Note lists name their event with `type`.
            None => {
                let notes = self.notes().await;
                serde_json::to_string(&json!({ "type": events::CSV_NOTE_RESPONSE, "data": notes }))
                    .map_err(|e| e.to_string())
            }
        };

        match frame {
            Ok(frame) => vec![frame],
            Err(e) => {
                tracing::error!("Failed to encode reply: {}", e);
                Vec::new()
            }
        }
    }

    fn command_reply(&self, event: &str, data: &Value) -> Envelope {
        let response = match serde_json::from_value::<DeviceCommand>(data.clone()) {
            Ok(command) if self.inner.reject_commands.load(Ordering::SeqCst) => {
                CommandResponse::rejected("command rejected").for_target(command.sector, command.device)
            }
            Ok(command) => {
                let mut details = Map::new();
                details.insert("status".into(), json!("ok"));
                CommandResponse::ok(details).for_target(command.sector, command.device)
            }
            Err(e) => CommandResponse::rejected(format!("invalid command: {e}")),
        };

        Envelope::new(event, json!(response))
    }

    async fn add_note(&self, data: &Value) {
        let new = match serde_json::from_value::<NewNote>(data.clone()) {
            Ok(new) => new,
            Err(e) => {
                tracing::warn!("Ignoring invalid note: {}", e);
                return;
            }
        };

        let date = Date::parse(&new.date, format_description!("[year]-[month]-[day]"))
            .ok()
            .and_then(|date| {
                date.format(format_description!("[month repr:short] [day padding:none]"))
                    .ok()
            })
            .unwrap_or(new.date);

        let mut notes = self.inner.notes.write().await;
        let id = if notes.iter().any(|note| note.id == new.id) {
            notes.iter().map(|note| note.id).max().unwrap_or(0) + 1
        } else {
            new.id
        };

        notes.push(Note {
            id,
            title: new.title,
            date,
            time_to_do: new.time_to_do,
            status: new.status,
        });
    }

    async fn delete_note(&self, data: &Value) {
        match serde_json::from_value::<DeleteNote>(data.clone()) {
            Ok(delete) => self
                .inner
                .notes
                .write()
                .await
                .retain(|note| note.id != delete.note_id),
            Err(e) => tracing::warn!("Ignoring invalid note deletion: {}", e),
        }
    }
}

fn sensor_reply(kind: SensorKind) -> Envelope {
    let fraction = day_fraction(OffsetDateTime::now_utc());
    let value = match kind {
        SensorKind::Temperature => simulated_temperature(fraction),
        SensorKind::Humidity => simulated_humidity(fraction),
        SensorKind::Light => simulated_lux(fraction),
    };

    let response = SensorResponse {
        success: true,
        data: Some(Reading::new(value, kind.default_unit())),
    };

    Envelope::new(kind.response_event(), json!(response))
}

#[cfg(test)]
mod tests {
    use growroom_api::transport::decode;

    use super::*;

    async fn reply(backend: &MockBackend, event: &str, data: Value) -> Envelope {
        let frames = backend.handle(Envelope::new(event, data)).await;
        assert_eq!(frames.len(), 1);
        decode(&frames[0]).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let backend = MockBackend::new();
        assert_eq!(reply(&backend, events::PING, json!({})).await.event, events::PONG);
        assert_eq!(backend.received().await.len(), 1);
    }

    #[tokio::test]
    async fn test_command_responses() {
        let backend = MockBackend::new();
        let command = json!({ "sector": "B", "device": "Pump", "status": true, "type": "Manual" });

        let ok = reply(&backend, events::DEVICE_COMMAND, command.clone()).await;
        assert_eq!(ok.event, events::COMMAND_RESPONSE);
        assert_eq!(ok.data["device"], json!("Pump"));
        assert!(ok.data.get("error").is_none());

        let invalid = reply(&backend, events::CONTROL_TYPE_CHANGE, json!({ "device": 3 })).await;
        assert_eq!(invalid.event, events::TYPE_CHANGE_RESPONSE);
        assert!(invalid.data["error"].is_string());

        backend.set_reject_commands(true);
        let rejected = reply(&backend, events::DEVICE_COMMAND, command).await;
        assert_eq!(rejected.data["error"], json!("command rejected"));
        assert_eq!(rejected.data["device"], json!("Pump"));
        assert_eq!(rejected.data["sector"], json!("B"));
    }

    #[tokio::test]
    async fn test_sensor_replies() {
        let backend = MockBackend::new();

        for kind in SensorKind::ALL {
            let envelope = reply(&backend, kind.request_event(), json!({})).await;
            assert_eq!(envelope.event, kind.response_event());

            let response: SensorResponse = serde_json::from_value(envelope.data).unwrap();
            assert!(response.success);
            assert_eq!(response.data.unwrap().unit.as_deref(), Some(kind.default_unit()));
        }
    }

    #[tokio::test]
    async fn test_note_lifecycle() {
        let backend = MockBackend::new();

        let listed = reply(&backend, events::GET_CSV_NOTE, json!({})).await;
        assert_eq!(listed.event, events::CSV_NOTE_RESPONSE);
        assert_eq!(listed.data, json!([]));

        let added = reply(
            &backend,
            events::ADD_NOTE,
            json!({
                "id": 1,
                "title": "Change filters",
                "status": "Planned",
                "date": "2026-10-16",
                "time": "09:30",
                "timeToDo": "2026-10-16 09:30"
            }),
        )
        .await;
        assert_eq!(
            added.data,
            json!([{
                "id": 1,
                "title": "Change filters",
                "date": "Oct 16",
                "timeToDo": "2026-10-16 09:30",
                "status": "Planned"
            }])
        );

        let deleted = reply(&backend, events::DELETE_NOTE, json!({ "noteId": 1 })).await;
        assert_eq!(deleted.data, json!([]));
    }

    #[tokio::test]
    async fn test_unknown_event_ignored() {
        let backend = MockBackend::new();
        assert!(backend.handle(Envelope::new("reboot", json!({}))).await.is_empty());
    }
}
