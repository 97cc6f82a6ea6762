use std::sync::Arc;

use growroom_api::message::CommandExtra;
use growroom_api::models::{ScheduleWindow, SensorKind, StartCommand};
use growroom_api::{ControlType, Sector};
use parking_lot::Mutex;
use serde_json::Value;

use crate::command::{Ack, CommandEncoder, Echo, ResponseChannel};
use crate::error::Result;
use crate::notify::Notifier;
use crate::storage::{LocalStorage, last_active_sector, store_active_sector};
use crate::store::{MutationTarget, SectorStore, ThresholdState};

const NOT_CONNECTED: &str = "Not connected to server. Attempting to reconnect...";
const SEND_FAILED: &str = "Failed to send command to server";

/// Operator actions on the active sector.
pub struct ControlPanel {
    encoder: Arc<CommandEncoder>,
    store: Arc<SectorStore>,
    storage: Arc<dyn LocalStorage>,
    notifier: Notifier,
    active: Mutex<Sector>,
}

impl ControlPanel {
    pub fn new(
        encoder: Arc<CommandEncoder>,
        store: Arc<SectorStore>,
        storage: Arc<dyn LocalStorage>,
        notifier: Notifier,
    ) -> Self {
        let active = last_active_sector(storage.as_ref());

        Self {
            encoder,
            store,
            storage,
            notifier,
            active: Mutex::new(active),
        }
    }

    pub fn active_sector(&self) -> Sector {
        *self.active.lock()
    }

    /// Makes `sector` active and remembers it across restarts.
    pub fn select_sector(&self, sector: Sector) -> Result<()> {
        *self.active.lock() = sector;
        store_active_sector(self.storage.as_ref(), sector)?;
        tracing::info!("Active sector is now {}", sector);
        Ok(())
    }

    /// Reports a dropped connection to the operator. Callers leave local
    /// state untouched when this returns `false`.
    fn ensure_connected(&self) -> bool {
        if self.encoder.ensure_connected() {
            return true;
        }

        self.notifier.error(NOT_CONNECTED);
        false
    }

    pub fn toggle_status(&self, device: &str) -> Result<bool> {
        let sector = self.active_sector();
        self.store.device(sector, device)?;
        if !self.ensure_connected() {
            return Ok(false);
        }

        let (mutation, state) =
            self.store
                .begin(sector, device, ResponseChannel::Command, |d| d.status = !d.status)?;

        let sent = self.encoder.send_device_command(
            sector,
            &state.id,
            state.status,
            state.control_type,
            CommandExtra::new(),
        );

        if sent {
            self.notifier.success(format!(
                "{} turned {}",
                state.id,
                if state.status { "on" } else { "off" }
            ));
        } else {
            self.store.rollback(mutation);
            self.notifier.error(SEND_FAILED);
        }

        Ok(sent)
    }

    /// Switches a device's mode. Schedule mode only changes the local state;
    /// it is submitted with its window by [`ControlPanel::save_schedule`].
    pub fn set_control_type(&self, device: &str, control_type: ControlType) -> Result<bool> {
        let sector = self.active_sector();
        self.store.device(sector, device)?;
        if !self.ensure_connected() {
            return Ok(false);
        }

        if control_type == ControlType::Schedule {
            self.store
                .update_device(sector, device, |d| d.control_type = control_type)?;
            return Ok(true);
        }

        let (mutation, state) = self.store.begin(
            sector,
            device,
            ResponseChannel::TypeChange,
            |d| d.control_type = control_type,
        )?;

        let sent = self.encoder.change_control_type(
            sector,
            &state.id,
            control_type,
            state.status,
            CommandExtra::new(),
        );

        if sent {
            self.notifier
                .success(format!("Control type changed to {}", control_type));
        } else {
            self.store.rollback(mutation);
            self.notifier.error("Failed to change control type");
        }

        Ok(sent)
    }

    pub fn save_schedule(&self, device: &str, window: ScheduleWindow) -> Result<bool> {
        let sector = self.active_sector();
        let extra = CommandExtra::from_fields(&window)?;
        self.store.device(sector, device)?;
        if !self.ensure_connected() {
            return Ok(false);
        }

        let (mutation, state) = self.store.begin(sector, device, ResponseChannel::TypeChange, |d| {
            d.control_type = ControlType::Schedule;
            d.schedule = window;
        })?;

        let sent = self.encoder.change_control_type(
            sector,
            &state.id,
            ControlType::Schedule,
            state.status,
            extra,
        );

        if sent {
            self.notifier
                .success(format!("Schedule settings saved for {}", state.id));
        } else {
            self.store.rollback(mutation);
            self.notifier.error("Failed to save schedule settings");
        }

        Ok(sent)
    }

    pub fn start_device(&self, device: &str) -> Result<bool> {
        let sector = self.active_sector();
        let current = self.store.device(sector, device)?;
        let extra = CommandExtra::from_fields(&StartCommand::new(current.active_schedule()))?;
        if !self.ensure_connected() {
            return Ok(false);
        }

        let (mutation, state) =
            self.store
                .begin(sector, device, ResponseChannel::Command, |d| d.status = true)?;

        let sent = self.encoder.send_device_command(
            sector,
            &state.id,
            true,
            state.control_type,
            extra,
        );

        if sent {
            self.notifier.success(format!(
                "Started {} in {} mode",
                state.id, state.control_type
            ));
        } else {
            self.store.rollback(mutation);
            self.notifier
                .error("Failed to start device - WebSocket not connected");
        }

        Ok(sent)
    }

    pub fn start_threshold(&self, kind: SensorKind) -> Result<bool> {
        let sector = self.active_sector();
        let threshold = self.store.threshold(sector, kind)?;
        let extra = CommandExtra::from_fields(&threshold.start_payload())?;
        if !self.ensure_connected() {
            return Ok(false);
        }

        let mutation = self.store.track(
            sector,
            MutationTarget::Threshold(kind),
            ResponseChannel::Command,
        );

        let sent = self.encoder.send_device_command(
            sector,
            kind.as_str(),
            true,
            ControlType::Threshold,
            extra,
        );

        if sent {
            self.store.set_threshold_active(sector, kind, true)?;
            self.notifier
                .success(format!("Started {} threshold monitoring", kind));
        } else {
            self.store.rollback(mutation);
            self.notifier.error("Failed to start threshold monitoring");
        }

        Ok(sent)
    }

    pub fn set_threshold_target(&self, kind: SensorKind, target: f64) -> Result<ThresholdState> {
        self.store
            .set_threshold_target(self.active_sector(), kind, target)
    }

    pub fn set_threshold_value(&self, kind: SensorKind, value: f64) -> Result<ThresholdState> {
        self.store
            .set_threshold_value(self.active_sector(), kind, value)
    }

    pub fn set_error_percentage(&self, kind: SensorKind, percentage: f64) -> Result<ThresholdState> {
        self.store
            .set_error_percentage(self.active_sector(), kind, percentage)
    }

    /// Settles the pending change a response on `channel` answers.
    pub fn handle_response(&self, channel: ResponseChannel, data: &Value) {
        let echo = Echo::from_response(data);

        match Ack::from_response(data) {
            Ack::Success(_) => {
                if let Some(mutation) = self.store.confirm(channel, &echo) {
                    tracing::debug!(mutation = mutation.id, "Change confirmed");
                }
            }
            Ack::Error(e) => {
                tracing::error!(event = channel.response_event(), "Server rejected command: {}", e);
                if self.store.fail(channel, &echo).is_none() {
                    tracing::warn!("No pending change answers this rejection");
                }
                self.notifier.error(format!("Server rejected command: {e}"));
            }
        }
    }
}
