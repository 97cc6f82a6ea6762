use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use growroom_api::message::CommandExtra;
use growroom_api::{ControlType, Sector};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::command::{CommandEncoder, ResponseChannel};
use crate::connection::ConnectionState;
use crate::storage::{LocalStorage, last_active_sector};
use crate::store::{MutationTarget, SectorStore};

/// Replays the last active sector once, on the first connect of the session.
pub struct ReconnectSync {
    encoder: Arc<CommandEncoder>,
    store: Arc<SectorStore>,
    storage: Arc<dyn LocalStorage>,
    initialized: AtomicBool,
}

impl ReconnectSync {
    pub fn new(
        encoder: Arc<CommandEncoder>,
        store: Arc<SectorStore>,
        storage: Arc<dyn LocalStorage>,
    ) -> Self {
        Self {
            encoder,
            store,
            storage,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Replays the stored sector unless a replay already ran. Returns whether
    /// this call performed it.
    pub fn on_connected(&self) -> bool {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return false;
        }

        let sector = last_active_sector(self.storage.as_ref());
        let submitted = self.replay(sector);
        tracing::info!("Synchronized sector {} ({} commands)", sector, submitted);
        true
    }

    /// Submits every device's state and every active threshold of `sector`,
    /// returning how many commands were accepted.
    pub fn replay(&self, sector: Sector) -> usize {
        let state = self.store.sector(sector);
        let mut submitted = 0;

        for device in &state.devices {
            let extra = match device.active_schedule() {
                Some(window) => CommandExtra::from_fields(&window),
                None => Ok(CommandExtra::new()),
            };
            let extra = match extra {
                Ok(extra) => extra,
                Err(e) => {
                    tracing::error!("Failed to encode schedule of {}: {}", device.id, e);
                    continue;
                }
            };

            let mutation = self.store.track(
                sector,
                MutationTarget::Device(device.id.clone()),
                ResponseChannel::TypeChange,
            );

            if self.encoder.change_control_type(
                sector,
                &device.id,
                device.control_type,
                device.status,
                extra,
            ) {
                submitted += 1;
            } else {
                self.store.rollback(mutation);
                tracing::error!("Failed to replay {} in sector {}", device.id, sector);
            }
        }

        for threshold in state.thresholds.iter().filter(|t| t.active) {
            let extra = match CommandExtra::from_fields(&threshold.start_payload()) {
                Ok(extra) => extra,
                Err(e) => {
                    tracing::error!("Failed to encode threshold {}: {}", threshold.kind, e);
                    continue;
                }
            };

            let mutation = self.store.track(
                sector,
                MutationTarget::Threshold(threshold.kind),
                ResponseChannel::Command,
            );

            if self.encoder.send_device_command(
                sector,
                threshold.kind.as_str(),
                true,
                ControlType::Threshold,
                extra,
            ) {
                submitted += 1;
            } else {
                self.store.rollback(mutation);
                tracing::error!(
                    "Failed to replay threshold {} in sector {}",
                    threshold.kind,
                    sector
                );
            }
        }

        submitted
    }

    /// Waits for the first `Connected` state and replays once.
    pub fn spawn(self: Arc<Self>, mut state: watch::Receiver<ConnectionState>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if state.borrow_and_update().is_connected() {
                    self.on_connected();
                    break;
                }

                if state.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use growroom_api::events;
    use growroom_api::models::SensorKind;
    use serde_json::json;

    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::storage::{MemoryStorage, store_active_sector};
    use crate::store::MutationState;
    use crate::testing::MockTransport;

    fn sync(transport: &Arc<MockTransport>, store: &Arc<SectorStore>, storage: Arc<MemoryStorage>) -> Arc<ReconnectSync> {
        let encoder = Arc::new(CommandEncoder::new(transport.clone(), Dispatcher::new()));
        Arc::new(ReconnectSync::new(encoder, store.clone(), storage))
    }

    #[test]
    fn test_replays_last_sector_once() {
        let transport = MockTransport::connected();
        let store = Arc::new(SectorStore::new());
        let storage = Arc::new(MemoryStorage::new());
        store_active_sector(storage.as_ref(), Sector::C).unwrap();

        store
            .update_device(Sector::C, "Motor Fan", |d| {
                d.control_type = ControlType::On;
                d.status = true;
            })
            .unwrap();
        store
            .set_threshold_active(Sector::C, SensorKind::Humidity, true)
            .unwrap();

        let sync = sync(&transport, &store, storage);
        assert!(sync.on_connected());
        assert!(!sync.on_connected());
        assert!(sync.is_initialized());

        let emitted = transport.emitted();
        assert_eq!(
            transport.events(),
            vec![
                events::CONTROL_TYPE_CHANGE,
                events::CONTROL_TYPE_CHANGE,
                events::CONTROL_TYPE_CHANGE,
                events::DEVICE_COMMAND,
            ]
        );
        assert_eq!(
            emitted[0].data,
            json!({
                "sector": "C",
                "device": "Light",
                "status": false,
                "type": "Schedule",
                "startTime": "00:00",
                "endTime": "23:59"
            })
        );
        assert_eq!(
            emitted[1].data,
            json!({ "sector": "C", "device": "Motor Fan", "status": true, "type": "On" })
        );
        assert_eq!(emitted[3].data["device"], json!("Humidity"));
        assert_eq!(emitted[3].data["type"], json!("Threshold"));
        assert_eq!(store.pending_count(), 4);
    }

    #[test]
    fn test_defaults_to_sector_a() {
        let transport = MockTransport::connected();
        let store = Arc::new(SectorStore::new());
        let sync = sync(&transport, &store, Arc::new(MemoryStorage::new()));

        assert!(sync.on_connected());
        assert!(transport.emitted().iter().all(|e| e.data["sector"] == json!("A")));
    }

    #[test]
    fn test_failed_replay_is_not_retried() {
        let transport = MockTransport::disconnected();
        let store = Arc::new(SectorStore::new());
        let sync = sync(&transport, &store, Arc::new(MemoryStorage::new()));

        assert!(sync.on_connected());
        assert!(transport.emitted().is_empty());
        assert!(
            store
                .mutations()
                .iter()
                .all(|m| m.state == MutationState::Failed)
        );

        transport.set_connected(true);
        assert!(!sync.on_connected());
        assert!(transport.emitted().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_fires_on_first_connect_only() {
        let transport = MockTransport::connected();
        let store = Arc::new(SectorStore::new());
        let sync = sync(&transport, &store, Arc::new(MemoryStorage::new()));
        let (state, rx) = watch::channel(ConnectionState::Disconnected);

        let task = sync.clone().spawn(rx);
        state.send_replace(ConnectionState::Connecting);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sync.is_initialized());

        state.send_replace(ConnectionState::Connected);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(transport.emitted().len(), 3);

        state.send_replace(ConnectionState::Disconnected);
        state.send_replace(ConnectionState::Connected);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.emitted().len(), 3);
    }
}
